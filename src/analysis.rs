use facecheck_vision::{media, FaceDescriptor, FaceEngine, MatchLabel, MatchResult};
use image::DynamicImage;
use log::{debug, info};
use serde::Serialize;

use crate::capture::{MediaSource, Side};
use crate::error::{CheckError, Result};
use crate::verdict::Verdict;

/// One test face and what it matched in the original.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceMatch {
    pub test_face: usize,
    /// Index into the original faces, `None` for unknown.
    pub original_face: Option<usize>,
    pub distance: f32,
}

impl From<(usize, MatchResult)> for FaceMatch {
    fn from((test_face, m): (usize, MatchResult)) -> Self {
        Self {
            test_face,
            original_face: match m.label {
                MatchLabel::Known(i) => Some(i),
                MatchLabel::Unknown => None,
            },
            distance: m.distance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub original_faces: usize,
    pub test_faces: usize,
    pub matches: Vec<FaceMatch>,
    pub match_percent: f64,
    pub verdict: Verdict,
    pub message: String,
}

/// All face descriptors in one input. Video inputs contribute every sampled frame.
pub fn extract_descriptors<E: FaceEngine + ?Sized>(
    engine: &mut E,
    source: &MediaSource,
    video_frame_stride: usize,
) -> Result<Vec<FaceDescriptor>> {
    if source.is_video() {
        let path = source.path.as_deref().ok_or_else(|| {
            CheckError::Media(format!("{} video has no file to decode", source.side))
        })?;
        return video_descriptors(engine, source.side, |visit| {
            media::for_each_video_frame(path, video_frame_stride, visit)
        });
    }

    let img = media::decode_image(&source.bytes).map_err(|e| CheckError::media(&e))?;
    let descriptors = engine
        .detect_descriptors(&img)
        .map_err(|e| CheckError::engine(&e))?;
    debug!("{}: {} face(s)", source.side, descriptors.len());
    Ok(descriptors)
}

type FrameVisitor<'a> = dyn FnMut(DynamicImage) -> anyhow::Result<()> + 'a;

/// Runs the engine over the frames `frames` hands to its visitor and joins the
/// results. An engine failure stops decoding and is reported as `Engine`;
/// a decoding failure is reported as `Media`.
fn video_descriptors<E, F>(engine: &mut E, side: Side, frames: F) -> Result<Vec<FaceDescriptor>>
where
    E: FaceEngine + ?Sized,
    F: FnOnce(&mut FrameVisitor<'_>) -> anyhow::Result<usize>,
{
    let mut descriptors = Vec::new();
    let mut failure = None;
    let sampled = frames(&mut |frame: DynamicImage| -> anyhow::Result<()> {
        match engine.detect_descriptors(&frame) {
            Ok(found) => {
                descriptors.extend(found);
                Ok(())
            }
            Err(e) => {
                failure = Some(e);
                anyhow::bail!("face analysis stopped")
            }
        }
    });
    if let Some(e) = failure {
        return Err(CheckError::engine(&e));
    }
    let sampled = sampled.map_err(|e| CheckError::media(&e))?;
    debug!("{}: {} face(s) across {} frame(s)", side, descriptors.len(), sampled);
    Ok(descriptors)
}

/// Score test faces against original faces. Empty sets never reach the percentage.
pub fn compare<E: FaceEngine + ?Sized>(
    engine: &E,
    original: &[FaceDescriptor],
    test: &[FaceDescriptor],
) -> Result<Analysis> {
    if original.is_empty() || test.is_empty() {
        return Err(CheckError::NoFaceDetected);
    }

    let results: Vec<MatchResult> = test.iter().map(|q| engine.match_best(q, original)).collect();
    let match_percent =
        facecheck_vision::matcher::match_percent(&results).ok_or(CheckError::NoFaceDetected)?;
    let verdict = Verdict::from_percent(match_percent);

    Ok(Analysis {
        original_faces: original.len(),
        test_faces: test.len(),
        matches: results.into_iter().enumerate().map(FaceMatch::from).collect(),
        match_percent,
        message: verdict.message(),
        verdict,
    })
}

/// The full flow: both inputs present, models loaded, original then test, then compare.
pub fn analyze<E: FaceEngine + ?Sized>(
    engine: &mut E,
    original: Option<&MediaSource>,
    test: Option<&MediaSource>,
    video_frame_stride: usize,
) -> Result<Analysis> {
    let (original, test) = match (original, test) {
        (Some(o), Some(t)) => (o, t),
        (o, t) => {
            let missing = [(Side::Original, o.is_none()), (Side::Test, t.is_none())]
                .into_iter()
                .filter_map(|(side, absent)| absent.then_some(side))
                .collect();
            return Err(CheckError::InputMissing(missing));
        }
    };

    if !engine.is_loaded() {
        engine
            .load_models()
            .map_err(|e| CheckError::ModelLoad(format!("{:#}", e)))?;
    }

    let original_descriptors = extract_descriptors(engine, original, video_frame_stride)?;
    if original_descriptors.is_empty() {
        return Err(CheckError::NoFaceDetected);
    }
    let test_descriptors = extract_descriptors(engine, test, video_frame_stride)?;

    let analysis = compare(engine, &original_descriptors, &test_descriptors)?;
    info!(
        "{} original face(s), {} test face(s), {:.2}% matched",
        analysis.original_faces, analysis.test_faces, analysis.match_percent
    );
    Ok(analysis)
}
