pub mod engine;
pub mod face;
pub mod matcher;
pub mod media;
pub mod model;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use engine::{EngineOptions, FaceEngine, OnnxFaceEngine};
pub use face::{Detection, FaceDescriptor};
pub use matcher::{MatchLabel, MatchResult};
pub use model::ModelPaths;
pub use video::{Camera, CameraDevice, FrameSource, StreamRequest, V4lCameras};
