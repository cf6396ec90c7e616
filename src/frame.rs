//! Detector frames and their header metadata.
//!
//! A [`Frame`] is a 2-D array of intensity samples with a fixed axis
//! convention: **columns run along the dispersion axis, rows along the
//! spatial (slit) axis**. Frames are immutable once constructed; the
//! reduction stages only ever read them.

use anyhow::Result;

use crate::wavecal::fit::DispersionGuess;

/// Header metadata attached to a detector frame.
///
/// The external I/O collaborator parses whatever on-disk format the
/// observatory uses and fills this in; the core only consumes these fields.
/// Unrecognized keywords travel in `cards` so they can be copied to the
/// output verbatim.
#[derive(Debug, Clone, Default)]
pub struct FrameHeader {
    /// Object name (target or lamp species).
    pub object: String,
    /// Lamp identifier for comparison-lamp frames (e.g. "HgAr").
    pub lamp: Option<String>,
    /// Approximate central wavelength of the spectral setup, in the line
    /// list's wavelength units (typically Angstrom).
    pub center_wavelength: Option<f64>,
    /// Approximate dispersion in wavelength units per pixel.
    pub dispersion: Option<f64>,
    /// Exposure time in seconds.
    pub exposure_seconds: Option<f64>,
    /// Pass-through key/value cards for provenance.
    pub cards: Vec<(String, String)>,
}

impl FrameHeader {
    /// Initial linear dispersion guess for the solution fitter, anchored at
    /// the frame's central dispersion pixel.
    ///
    /// Returns `None` when the header lacks either the central wavelength or
    /// the dispersion estimate.
    pub fn dispersion_guess(&self, n_pixels: usize) -> Option<DispersionGuess> {
        Some(DispersionGuess {
            center_wavelength: self.center_wavelength?,
            dispersion: self.dispersion?,
            reference_pixel: (n_pixels.saturating_sub(1)) as f64 / 2.0,
        })
    }
}

/// A 2-D detector frame: row-major pixels plus header metadata.
///
/// Axis convention: `width` columns along dispersion, `height` rows along
/// the slit. Pixel `(col, row)` lives at index `row * width + col`.
#[derive(Debug, Clone)]
pub struct Frame {
    width: usize,
    height: usize,
    pixels: Vec<f32>,
    header: FrameHeader,
}

impl Frame {
    /// Build a frame from row-major pixel data.
    ///
    /// Fails when the pixel count does not match `width * height`.
    pub fn from_raw(
        pixels: Vec<f32>,
        width: usize,
        height: usize,
        header: FrameHeader,
    ) -> Result<Self> {
        anyhow::ensure!(
            pixels.len() == width * height,
            "pixel data length ({}) does not match width*height ({}x{}={})",
            pixels.len(),
            width,
            height,
            width * height
        );
        anyhow::ensure!(width > 0 && height > 0, "frame dimensions must be non-zero");
        Ok(Self {
            width,
            height,
            pixels,
            header,
        })
    }

    /// Load a frame from an image file, converting to grayscale intensities.
    ///
    /// Header metadata cannot be recovered from plain image formats, so the
    /// caller supplies it. Requires the `image` feature.
    #[cfg(feature = "image")]
    pub fn from_image_file(path: impl AsRef<std::path::Path>, header: FrameHeader) -> Result<Self> {
        use anyhow::Context;
        let img = image::open(path.as_ref())
            .with_context(|| format!("failed to open frame image: {}", path.as_ref().display()))?;
        let gray = img.to_luma16();
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let pixels: Vec<f32> = gray.as_raw().iter().map(|&v| v as f32).collect();
        Self::from_raw(pixels, w, h, header)
    }

    /// Number of dispersion-axis columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of spatial-axis rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Header metadata.
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Raw row-major pixel data.
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    /// Intensity at dispersion column `col`, spatial row `row`.
    #[inline]
    pub fn get(&self, col: usize, row: usize) -> f32 {
        self.pixels[row * self.width + col]
    }
}
