//! From a match percentage to a verdict message and a uniform 10x10 swatch.
//!
//! Colour and tooltip are both looked up from [`INTENSITY_BANDS`], so the
//! 0.3 / 0.7 thresholds live in exactly one place.

use serde::Serialize;

pub const GRID_ROWS: usize = 10;
pub const GRID_COLUMNS: usize = 10;

pub const MATCH_MESSAGE: &str = "No deepfake detected. Similar faces detected.";
pub const NO_MATCH_MESSAGE: &str = "Deepfake detected. No similarity in faces.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: f32,
}

impl Rgba {
    pub fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, (self.a.clamp(0.0, 1.0) * 255.0).round() as u8]
    }

    pub fn css(&self) -> String {
        format!("rgba({}, {}, {}, {})", self.r, self.g, self.b, self.a)
    }
}

/// One row of the banding table: intensities strictly below `upper` use it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityBand {
    pub upper: f32,
    pub label: &'static str,
    pub color: Rgba,
}

pub const INTENSITY_BANDS: [IntensityBand; 3] = [
    IntensityBand {
        upper: 0.3,
        label: "Low",
        color: Rgba { r: 144, g: 238, b: 144, a: 0.8 },
    },
    IntensityBand {
        upper: 0.7,
        label: "Medium",
        color: Rgba { r: 255, g: 200, b: 124, a: 0.8 },
    },
    IntensityBand {
        upper: f32::INFINITY,
        label: "High",
        color: Rgba { r: 255, g: 102, b: 102, a: 0.8 },
    },
];

pub fn band_for(intensity: f32) -> &'static IntensityBand {
    INTENSITY_BANDS
        .iter()
        .find(|b| intensity < b.upper)
        .unwrap_or(&INTENSITY_BANDS[INTENSITY_BANDS.len() - 1])
}

pub fn cell_color(cell: &VerdictCell) -> Rgba {
    band_for(cell.intensity).color
}

pub fn cell_tooltip(cell: &VerdictCell) -> String {
    format!(
        "({}, {}): {} ({:.1})",
        cell.row,
        cell.column,
        band_for(cell.intensity).label,
        cell.intensity
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VerdictCell {
    pub row: usize,
    pub column: usize,
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Match,
    Partial { match_percent: f64 },
    NoMatch,
}

impl Verdict {
    /// Exactly 100 is a match, exactly 0 (or less) is no match, anything else is partial.
    pub fn from_percent(match_percent: f64) -> Self {
        if match_percent >= 100.0 {
            Verdict::Match
        } else if match_percent > 0.0 {
            Verdict::Partial { match_percent }
        } else {
            Verdict::NoMatch
        }
    }

    pub fn message(&self) -> String {
        match self {
            Verdict::Match => MATCH_MESSAGE.to_string(),
            Verdict::Partial { match_percent } => {
                format!("Deepfake detected. Similarity: {:.2}%", match_percent)
            }
            Verdict::NoMatch => NO_MATCH_MESSAGE.to_string(),
        }
    }

    pub fn intensity(&self) -> f32 {
        match self {
            Verdict::Match => 0.2,
            Verdict::Partial { .. } => 0.5,
            Verdict::NoMatch => 1.0,
        }
    }

    pub fn status(&self) -> StatusClass {
        match self {
            Verdict::Match => StatusClass::Success,
            Verdict::Partial { .. } => StatusClass::Info,
            Verdict::NoMatch => StatusClass::Error,
        }
    }

    pub fn cells(&self) -> Vec<VerdictCell> {
        let intensity = self.intensity();
        (0..GRID_ROWS)
            .flat_map(|row| {
                (0..GRID_COLUMNS).map(move |column| VerdictCell {
                    row,
                    column,
                    intensity,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_match() {
        let v = Verdict::from_percent(100.0);
        assert_eq!(v.message(), "No deepfake detected. Similar faces detected.");
        assert_eq!(v.intensity(), 0.2);
        assert_eq!(v.status(), StatusClass::Success);
    }

    #[test]
    fn test_no_match() {
        let v = Verdict::from_percent(0.0);
        assert_eq!(v.message(), "Deepfake detected. No similarity in faces.");
        assert_eq!(v.intensity(), 1.0);
        assert_eq!(v.status(), StatusClass::Error);
    }

    #[test]
    fn test_partial_uses_two_decimals() {
        let v = Verdict::from_percent(75.0);
        assert_eq!(v.message(), "Deepfake detected. Similarity: 75.00%");
        assert_eq!(v.intensity(), 0.5);
        assert_eq!(v.status(), StatusClass::Info);

        let v = Verdict::from_percent(100.0 / 3.0);
        assert_eq!(v.message(), "Deepfake detected. Similarity: 33.33%");
        assert_eq!(Verdict::from_percent(0.004).intensity(), 0.5);
        assert_eq!(Verdict::from_percent(99.999).intensity(), 0.5);
    }

    #[test]
    fn test_grid_is_uniform_ten_by_ten() {
        let cells = Verdict::from_percent(75.0).cells();
        assert_eq!(cells.len(), 100);
        assert!(cells.iter().all(|c| c.intensity == 0.5));
        assert_eq!(cells[0], VerdictCell { row: 0, column: 0, intensity: 0.5 });
        assert_eq!(cells[99].row, 9);
        assert_eq!(cells[99].column, 9);
    }

    #[test]
    fn test_bands_split_at_thresholds() {
        assert_eq!(band_for(0.2).label, "Low");
        assert_eq!(band_for(0.29).label, "Low");
        assert_eq!(band_for(0.3).label, "Medium");
        assert_eq!(band_for(0.5).label, "Medium");
        assert_eq!(band_for(0.7).label, "High");
        assert_eq!(band_for(1.0).label, "High");
    }

    #[test]
    fn test_color_and_tooltip_agree() {
        for v in [Verdict::Match, Verdict::Partial { match_percent: 50.0 }, Verdict::NoMatch] {
            let cell = v.cells()[0];
            let band = band_for(cell.intensity);
            assert_eq!(cell_color(&cell), band.color);
            assert!(cell_tooltip(&cell).contains(band.label));
        }
        assert_eq!(
            cell_color(&VerdictCell { row: 0, column: 0, intensity: 1.0 }).css(),
            "rgba(255, 102, 102, 0.8)"
        );
    }

    #[test]
    fn test_rgba_bytes() {
        assert_eq!(INTENSITY_BANDS[0].color.to_bytes(), [144, 238, 144, 204]);
    }
}
