pub mod analysis;
pub mod capture;
pub mod config;
pub mod error;
pub mod grid;
pub mod session;
pub mod verdict;

pub use error::CheckError;

// Re-export vision types for convenience
pub use facecheck_vision::{
    engine, face, matcher, media, video, FaceDescriptor, FaceEngine, OnnxFaceEngine,
};
