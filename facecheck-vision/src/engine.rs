use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, FaceDescriptor, DESCRIPTOR_LEN, ENCODER_INPUT};
use crate::matcher::{self, MatchResult};
use crate::model::{self, ModelPaths};

/// Detection and recognition, seen from the outside.
///
/// `load_models` must succeed before any detection call.
pub trait FaceEngine {
    fn load_models(&mut self) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// One descriptor per face found in `img`, in detection order.
    fn detect_descriptors(&mut self, img: &DynamicImage) -> Result<Vec<FaceDescriptor>>;

    /// Closest reference for `query`, or unknown.
    fn match_best(&self, query: &FaceDescriptor, reference: &[FaceDescriptor]) -> MatchResult;
}

/// Tunables for [`OnnxFaceEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub max_distance: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
            max_distance: matcher::DEFAULT_MAX_DISTANCE,
        }
    }
}

struct Sessions {
    detector: Session,
    encoder: Session,
}

/// YuNet detection → eye alignment → SFace encoding.
pub struct OnnxFaceEngine {
    paths: ModelPaths,
    options: EngineOptions,
    sessions: Option<Sessions>,
}

impl OnnxFaceEngine {
    pub fn new(paths: ModelPaths, options: EngineOptions) -> Self {
        Self {
            paths,
            options,
            sessions: None,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

impl FaceEngine for OnnxFaceEngine {
    fn load_models(&mut self) -> Result<()> {
        if self.sessions.is_some() {
            return Ok(());
        }
        let missing = self.paths.missing();
        if !missing.is_empty() {
            anyhow::bail!("model file(s) not found: {:?}", missing);
        }
        let detector = model::detector_session(&self.paths)?;
        let encoder = model::recog_session(&self.paths)?;
        self.sessions = Some(Sessions { detector, encoder });
        log::info!("face models loaded");
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.sessions.is_some()
    }

    fn detect_descriptors(&mut self, img: &DynamicImage) -> Result<Vec<FaceDescriptor>> {
        let sessions = self
            .sessions
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("face models are not loaded"))?;

        let detections = face::detect_faces(
            &mut sessions.detector,
            img,
            self.options.score_threshold,
            self.options.nms_threshold,
        )
        .context("detecting faces")?;

        let mut descriptors = Vec::with_capacity(detections.len());
        for (i, detection) in detections.iter().enumerate() {
            let aligned = match face::align_face(img, detection, ENCODER_INPUT) {
                Ok(aligned) => aligned,
                Err(e) => {
                    log::warn!("face {}: skipped: {}", i + 1, e);
                    continue;
                }
            };
            let descriptor =
                face::encode_face(&mut sessions.encoder, &aligned).context("encoding face")?;
            descriptors.push(check_descriptor(descriptor)?);
        }
        log::debug!("{} face(s) detected, {} encoded", detections.len(), descriptors.len());
        Ok(descriptors)
    }

    fn match_best(&self, query: &FaceDescriptor, reference: &[FaceDescriptor]) -> MatchResult {
        matcher::best_match(query, reference, self.options.max_distance)
    }
}

/// Descriptors of different lengths cannot be compared.
fn check_descriptor(descriptor: FaceDescriptor) -> Result<FaceDescriptor> {
    anyhow::ensure!(
        descriptor.len() == DESCRIPTOR_LEN,
        "recognition model produced {} values, expected {}",
        descriptor.len(),
        DESCRIPTOR_LEN
    );
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_missing_models_fail_to_load() {
        let mut engine = OnnxFaceEngine::new(
            ModelPaths::in_dir(Path::new("/nonexistent/facecheck-models")),
            EngineOptions::default(),
        );
        let err = engine.load_models().unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_detect_requires_loaded_models() {
        let mut engine = OnnxFaceEngine::new(
            ModelPaths::in_dir(Path::new("/nonexistent")),
            EngineOptions::default(),
        );
        assert!(engine.detect_descriptors(&DynamicImage::new_rgb8(8, 8)).is_err());
    }

    #[test]
    fn test_descriptor_length_is_enforced() {
        assert!(check_descriptor(FaceDescriptor::from_vec(vec![0.5; DESCRIPTOR_LEN])).is_ok());
        let err = check_descriptor(FaceDescriptor::from_vec(vec![0.5; 512])).unwrap_err();
        assert!(err.to_string().contains("512"));
    }
}
