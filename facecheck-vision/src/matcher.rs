use crate::face::FaceDescriptor;
use std::fmt;

/// Default cosine-distance cut-off for SFace descriptors.
pub const DEFAULT_MAX_DISTANCE: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLabel {
    /// Index into the reference descriptor set.
    Known(usize),
    Unknown,
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchLabel::Known(i) => write!(f, "face {}", i + 1),
            MatchLabel::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub label: MatchLabel,
    pub distance: f32,
}

impl MatchResult {
    pub fn is_known(&self) -> bool {
        matches!(self.label, MatchLabel::Known(_))
    }
}

/// Labels a query with its closest reference, or `Unknown` past `max_distance`.
pub fn best_match(query: &FaceDescriptor, reference: &[FaceDescriptor], max_distance: f32) -> MatchResult {
    let closest = reference
        .iter()
        .enumerate()
        .map(|(i, r)| (i, query.distance(r)))
        .fold(None, |acc: Option<(usize, f32)>, (i, d)| match acc {
            Some((_, best)) if best <= d => acc,
            _ => Some((i, d)),
        });

    match closest {
        Some((index, distance)) if distance <= max_distance => MatchResult {
            label: MatchLabel::Known(index),
            distance,
        },
        Some((_, distance)) => MatchResult {
            label: MatchLabel::Unknown,
            distance,
        },
        None => MatchResult {
            label: MatchLabel::Unknown,
            distance: f32::INFINITY,
        },
    }
}

/// Share of known matches, in percent. `None` when there is nothing to score.
pub fn match_percent(results: &[MatchResult]) -> Option<f64> {
    if results.is_empty() {
        return None;
    }
    let known = results.iter().filter(|m| m.is_known()).count();
    Some(known as f64 / results.len() as f64 * 100.0)
}
