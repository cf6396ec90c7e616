//! Reference line lists: the known laboratory wavelengths of a comparison
//! lamp species.
//!
//! Line lists are externally supplied, one per lamp species, as plain text:
//! one wavelength per line with an optional relative intensity, `#` starting
//! a comment. The list is sorted on load and queried with a binary search.

use anyhow::{Context, Result};

/// A single laboratory reference line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceLine {
    /// Laboratory wavelength, in the unit the observatory uses (typically
    /// Angstrom).
    pub wavelength: f64,
    /// Relative intensity, when the list provides one.
    pub intensity: Option<f64>,
}

/// An ordered set of known calibration wavelengths for one lamp species.
#[derive(Debug, Clone)]
pub struct ReferenceLineList {
    species: String,
    lines: Vec<ReferenceLine>,
}

impl ReferenceLineList {
    /// Build a list from bare wavelengths, sorting them ascending.
    pub fn new(species: impl Into<String>, wavelengths: &[f64]) -> Self {
        let mut lines: Vec<ReferenceLine> = wavelengths
            .iter()
            .map(|&w| ReferenceLine {
                wavelength: w,
                intensity: None,
            })
            .collect();
        lines.sort_by(|a, b| {
            a.wavelength
                .partial_cmp(&b.wavelength)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self {
            species: species.into(),
            lines,
        }
    }

    /// Load a list from a plain-text file.
    ///
    /// Each non-comment line holds `wavelength [intensity]`. Malformed
    /// records fail the load rather than being skipped silently.
    pub fn from_file(species: impl Into<String>, path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read line list: {}", path.display()))?;
        Self::parse(species, &text)
            .with_context(|| format!("failed to parse line list: {}", path.display()))
    }

    /// Parse a line list from text (see [`Self::from_file`] for the format).
    pub fn parse(species: impl Into<String>, text: &str) -> Result<Self> {
        let mut lines = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let record = raw.split('#').next().unwrap_or("").trim();
            if record.is_empty() {
                continue;
            }
            let mut fields = record.split_whitespace();
            let wavelength: f64 = fields
                .next()
                .unwrap()
                .parse()
                .with_context(|| format!("bad wavelength on line {}", lineno + 1))?;
            let intensity = match fields.next() {
                Some(f) => Some(
                    f.parse::<f64>()
                        .with_context(|| format!("bad intensity on line {}", lineno + 1))?,
                ),
                None => None,
            };
            lines.push(ReferenceLine {
                wavelength,
                intensity,
            });
        }
        anyhow::ensure!(!lines.is_empty(), "line list contains no lines");
        lines.sort_by(|a, b| {
            a.wavelength
                .partial_cmp(&b.wavelength)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(Self {
            species: species.into(),
            lines,
        })
    }

    /// Lamp species this list describes.
    pub fn species(&self) -> &str {
        &self.species
    }

    /// Number of reference lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when the list is empty.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// All lines, ascending in wavelength.
    pub fn lines(&self) -> &[ReferenceLine] {
        &self.lines
    }

    /// The reference wavelength nearest to `wavelength`, with its distance.
    pub fn nearest(&self, wavelength: f64) -> Option<(f64, f64)> {
        if self.lines.is_empty() {
            return None;
        }
        let idx = self
            .lines
            .partition_point(|line| line.wavelength < wavelength);
        let mut best: Option<(f64, f64)> = None;
        for candidate in [idx.wrapping_sub(1), idx] {
            if let Some(line) = self.lines.get(candidate) {
                let dist = (line.wavelength - wavelength).abs();
                if best.map_or(true, |(_, d)| dist < d) {
                    best = Some((line.wavelength, dist));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_comments_and_intensities() {
        let text = "# HgAr lamp\n4046.56 120\n4358.33 300\n5460.74  # strong\n";
        let list = ReferenceLineList::parse("HgAr", text).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.lines()[0].intensity, Some(120.0));
        assert_eq!(list.lines()[2].intensity, None);
        assert_eq!(list.species(), "HgAr");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ReferenceLineList::parse("X", "not-a-number\n").is_err());
        assert!(ReferenceLineList::parse("X", "# only comments\n").is_err());
    }

    #[test]
    fn nearest_picks_the_closer_neighbor() {
        let list = ReferenceLineList::new("X", &[4000.0, 4100.0, 4500.0]);
        let (w, d) = list.nearest(4120.0).unwrap();
        assert_eq!(w, 4100.0);
        assert!((d - 20.0).abs() < 1e-12);
        let (w, _) = list.nearest(3000.0).unwrap();
        assert_eq!(w, 4000.0);
        let (w, _) = list.nearest(9000.0).unwrap();
        assert_eq!(w, 4500.0);
    }
}
