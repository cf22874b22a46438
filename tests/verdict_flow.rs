//! End-to-end through the public API with a stand-in engine and camera.

use anyhow::Result;
use facecheck::analysis;
use facecheck::capture::{CaptureController, CaptureState, MediaOrigin, Side};
use facecheck::grid::{GridContainer, GridHandle, ImageGridRenderer};
use facecheck::matcher::{best_match, MatchResult};
use facecheck::verdict::{cell_color, cell_tooltip, Verdict};
use facecheck::video::{CameraDevice, FrameSource, StreamRequest};
use facecheck::{CheckError, FaceDescriptor, FaceEngine};
use image::{DynamicImage, RgbImage};

/// Every distinct non-black pixel colour in the frame is one "face".
struct ColourFaces;

impl FaceEngine for ColourFaces {
    fn load_models(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn detect_descriptors(&mut self, img: &DynamicImage) -> Result<Vec<FaceDescriptor>> {
        let mut seen: Vec<[u8; 3]> = img
            .to_rgb8()
            .pixels()
            .map(|p| p.0)
            .filter(|p| *p != [0, 0, 0])
            .collect();
        seen.sort();
        seen.dedup();
        Ok(seen
            .into_iter()
            .map(|[r, g, b]| FaceDescriptor::from_vec(vec![r as f32, g as f32, b as f32]))
            .collect())
    }

    fn match_best(&self, query: &FaceDescriptor, reference: &[FaceDescriptor]) -> MatchResult {
        best_match(query, reference, 0.01)
    }
}

struct Solid(image::Rgb<u8>);

struct SolidStream {
    colour: image::Rgb<u8>,
    live: bool,
}

impl FrameSource for SolidStream {
    fn frame(&mut self) -> Result<RgbImage> {
        Ok(RgbImage::from_pixel(32, 24, self.colour))
    }

    fn stop(&mut self) {
        self.live = false;
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn resolution(&self) -> (u32, u32) {
        (32, 24)
    }
}

impl CameraDevice for Solid {
    fn open(&self, _request: &StreamRequest) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(SolidStream {
            colour: self.0,
            live: true,
        }))
    }
}

fn request() -> StreamRequest {
    StreamRequest {
        device: "solid".to_string(),
        width: 640,
        height: 480,
    }
}

#[test]
fn test_camera_capture_against_uploaded_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let original = dir.path().join("original.png");
    let mut img = RgbImage::new(4, 1);
    img.put_pixel(0, 0, image::Rgb([200, 0, 0]));
    img.put_pixel(1, 0, image::Rgb([0, 0, 200]));
    img.save(&original)?;

    let mut capture = CaptureController::new(Solid(image::Rgb([200, 0, 0])), request(), 100);
    capture.select_file(Side::Original, &original)?;
    capture.start(Side::Test)?;
    capture.capture(Side::Test)?;
    capture.stop(Side::Test);
    assert_eq!(capture.state(Side::Test), CaptureState::Captured);
    assert_eq!(
        capture.resolve_input(Side::Test).map(|s| s.origin),
        Some(MediaOrigin::CapturedImage)
    );

    let report = analysis::analyze(
        &mut ColourFaces,
        capture.resolve_input(Side::Original),
        capture.resolve_input(Side::Test),
        1,
    );
    // JPEG blurs a solid red frame a little, so accept a full or partial match
    let report = report?;
    assert!(report.match_percent > 0.0, "{:?}", report);

    let mut grid = GridContainer::new(ImageGridRenderer::default());
    let handle = grid.render(&report.verdict.cells(), &cell_color, &cell_tooltip)?;
    assert!(!handle.is_destroyed());
    assert!(handle.tooltip(5, 5).is_some());
    Ok(())
}

#[test]
fn test_uploaded_pair_verdicts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let write = |name: &str, colours: &[[u8; 3]]| -> Result<std::path::PathBuf> {
        let path = dir.path().join(name);
        let mut img = RgbImage::new(colours.len() as u32, 1);
        for (x, c) in colours.iter().enumerate() {
            img.put_pixel(x as u32, 0, image::Rgb(*c));
        }
        img.save(&path)?;
        Ok(path)
    };
    let a = write("a.png", &[[255, 0, 0], [0, 255, 0], [0, 0, 255]])?;
    let b = write("b.png", &[[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 0]])?;
    let c = write("c.png", &[[255, 255, 0]])?;
    let blank = write("blank.png", &[[0, 0, 0]])?;

    let mut capture = CaptureController::new(Solid(image::Rgb([0, 0, 0])), request(), 90);
    let mut verdict_for = |original: &std::path::Path, test: &std::path::Path| {
        capture.select_file(Side::Original, original)?;
        capture.select_file(Side::Test, test)?;
        analysis::analyze(
            &mut ColourFaces,
            capture.resolve_input(Side::Original),
            capture.resolve_input(Side::Test),
            1,
        )
    };

    let partial = verdict_for(&a, &b)?;
    assert_eq!(partial.message, "Deepfake detected. Similarity: 75.00%");
    assert_eq!(partial.verdict.intensity(), 0.5);

    assert_eq!(verdict_for(&a, &a)?.verdict, Verdict::Match);
    assert_eq!(verdict_for(&a, &c)?.verdict, Verdict::NoMatch);
    assert!(matches!(verdict_for(&a, &blank), Err(CheckError::NoFaceDetected)));
    Ok(())
}
