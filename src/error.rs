use std::fmt;
use thiserror::Error;

use crate::capture::Side;

/// Everything that can go wrong between picking inputs and showing a verdict.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Please upload {}.", MissingSides(.0))]
    InputMissing(Vec<Side>),

    #[error("No faces detected in one or both files.")]
    NoFaceDetected,

    #[error("Camera error: {0}")]
    Device(String),

    #[error("Face models failed to load: {0}")]
    ModelLoad(String),

    #[error("Could not read media: {0}")]
    Media(String),

    #[error("Face analysis failed: {0}")]
    Engine(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckError {
    pub fn device(err: &anyhow::Error) -> Self {
        Self::Device(format!("{:#}", err))
    }

    pub fn media(err: &anyhow::Error) -> Self {
        Self::Media(format!("{:#}", err))
    }

    pub fn engine(err: &anyhow::Error) -> Self {
        Self::Engine(format!("{:#}", err))
    }
}

struct MissingSides<'a>(&'a [Side]);

impl fmt::Display for MissingSides<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            [side] => write!(f, "the {} file", side),
            _ => f.write_str("both files"),
        }
    }
}

pub type Result<T> = std::result::Result<T, CheckError>;
