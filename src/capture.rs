//! Per-side acquisition of the two inputs: uploaded files or camera captures.
//!
//! Each side owns a slot holding an optional live stream, an optional
//! captured frame and an optional uploaded file. The most recent of
//! capture/upload wins when the input is resolved.

use anyhow::Context;
use facecheck_vision::{media, CameraDevice, FrameSource, StreamRequest};
use image::codecs::jpeg::JpegEncoder;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{CheckError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Original,
    Test,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Original, Side::Test];

    fn index(self) -> usize {
        match self {
            Side::Original => 0,
            Side::Test => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Original => "original",
            Side::Test => "test",
        })
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" | "o" => Ok(Side::Original),
            "test" | "t" => Ok(Side::Test),
            other => Err(format!("unknown side '{}', expected original or test", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaOrigin {
    UploadedFile,
    CapturedImage,
}

/// One side's input, ready for analysis.
#[derive(Clone)]
pub struct MediaSource {
    pub side: Side,
    pub origin: MediaOrigin,
    pub mime: String,
    pub bytes: Vec<u8>,
    /// Where an uploaded file came from; video decoding reads from here.
    pub path: Option<PathBuf>,
}

impl MediaSource {
    pub fn is_video(&self) -> bool {
        media::is_video(&self.mime)
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSource")
            .field("side", &self.side)
            .field("origin", &self.origin)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .field("path", &self.path)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Idle,
    Streaming,
    Captured,
}

/// What the live preview for a side is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// Token for an in-flight start; only the newest one per side may complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTicket {
    side: Side,
    generation: u64,
}

impl StartTicket {
    pub fn side(&self) -> Side {
        self.side
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A newer start for the same side was issued; this stream was released.
    Superseded,
}

#[derive(Default)]
struct Slot {
    stream: Option<Box<dyn FrameSource>>,
    preview: Option<Preview>,
    captured: Option<MediaSource>,
    uploaded: Option<MediaSource>,
    generation: u64,
    pending: Option<u64>,
}

impl Slot {
    fn release_stream(&mut self, side: Side) -> bool {
        self.preview = None;
        match self.stream.take() {
            Some(mut stream) => {
                stream.stop();
                debug!("{}: stream released", side);
                true
            }
            None => false,
        }
    }
}

pub struct CaptureController<D: CameraDevice> {
    device: D,
    request: StreamRequest,
    quality: u8,
    slots: [Slot; 2],
}

impl<D: CameraDevice> CaptureController<D> {
    pub fn new(device: D, request: StreamRequest, quality: u8) -> Self {
        Self {
            device,
            request,
            quality: quality.clamp(1, 100),
            slots: Default::default(),
        }
    }

    fn slot(&self, side: Side) -> &Slot {
        &self.slots[side.index()]
    }

    fn slot_mut(&mut self, side: Side) -> &mut Slot {
        &mut self.slots[side.index()]
    }

    pub fn state(&self, side: Side) -> CaptureState {
        let slot = self.slot(side);
        if slot.captured.is_some() {
            CaptureState::Captured
        } else if slot.stream.is_some() {
            CaptureState::Streaming
        } else {
            CaptureState::Idle
        }
    }

    pub fn is_streaming(&self, side: Side) -> bool {
        self.slot(side).stream.as_ref().is_some_and(|s| s.is_live())
    }

    pub fn preview(&self, side: Side) -> Option<&Preview> {
        self.slot(side).preview.as_ref()
    }

    pub fn is_start_pending(&self, side: Side) -> bool {
        self.slot(side).pending.is_some()
    }

    /// Open a fresh stream for `side`, replacing any stream and capture it had.
    pub fn start(&mut self, side: Side) -> Result<()> {
        let ticket = self.begin_start(side);
        let opened = self.device.open(&self.request);
        self.complete_start(ticket, opened).map(|_| ())
    }

    /// First half of [`start`](Self::start): invalidates the side's capture and
    /// current stream and supersedes any start still in flight.
    pub fn begin_start(&mut self, side: Side) -> StartTicket {
        let slot = self.slot_mut(side);
        slot.release_stream(side);
        if slot.captured.take().is_some() {
            debug!("{}: captured frame discarded by new start", side);
        }
        slot.generation += 1;
        if slot.pending.replace(slot.generation).is_some() {
            warn!("{}: superseding a pending camera start", side);
        }
        StartTicket {
            side,
            generation: slot.generation,
        }
    }

    /// Second half of [`start`](Self::start). Stale tickets have their stream
    /// released immediately.
    pub fn complete_start(
        &mut self,
        ticket: StartTicket,
        opened: anyhow::Result<Box<dyn FrameSource>>,
    ) -> Result<StartOutcome> {
        let side = ticket.side;
        let device = self.request.device.clone();
        let slot = self.slot_mut(side);

        if slot.pending != Some(ticket.generation) {
            match opened {
                Ok(mut stale) => {
                    stale.stop();
                    debug!("{}: stale stream {} released", side, ticket.generation);
                }
                Err(e) => debug!("{}: stale start {} failed: {:#}", side, ticket.generation, e),
            }
            return Ok(StartOutcome::Superseded);
        }
        slot.pending = None;

        let stream = opened
            .with_context(|| format!("starting camera {}", device))
            .map_err(|e| CheckError::device(&e))?;
        let (width, height) = stream.resolution();
        slot.preview = Some(Preview {
            device,
            width,
            height,
        });
        slot.stream = Some(stream);
        info!("{}: camera streaming at {}x{}", side, width, height);
        Ok(StartOutcome::Started)
    }

    /// Release the side's stream and clear its preview. No-op when idle.
    pub fn stop(&mut self, side: Side) {
        let slot = self.slot_mut(side);
        slot.pending = None;
        if slot.release_stream(side) {
            info!("{}: camera stopped", side);
        }
    }

    pub fn stop_all(&mut self) {
        for side in Side::ALL {
            self.stop(side);
        }
    }

    /// Snapshot the live stream as JPEG; the stream keeps running.
    pub fn capture(&mut self, side: Side) -> Result<&MediaSource> {
        let quality = self.quality;
        let slot = self.slot_mut(side);
        let stream = slot
            .stream
            .as_mut()
            .filter(|s| s.is_live())
            .ok_or_else(|| CheckError::Device(format!("the {} camera is not streaming", side)))?;

        let frame = stream
            .frame()
            .map_err(|e| CheckError::device(&e))?;
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality)
            .encode_image(&frame)
            .map_err(|e| CheckError::Media(format!("failed to encode JPEG: {}", e)))?;

        info!(
            "{}: captured {}x{} frame ({} bytes)",
            side,
            frame.width(),
            frame.height(),
            bytes.len()
        );
        Ok(slot.captured.insert(MediaSource {
            side,
            origin: MediaOrigin::CapturedImage,
            mime: "image/jpeg".to_string(),
            bytes,
            path: None,
        }))
    }

    /// Read `path` as this side's uploaded file. Drops any earlier capture.
    pub fn select_file(&mut self, side: Side, path: &Path) -> Result<&MediaSource> {
        let bytes = std::fs::read(path)?;
        let mime = media::sniff_mime(path, &bytes)
            .filter(|m| media::is_image(m) || media::is_video(m))
            .ok_or_else(|| {
                CheckError::Media(format!("{} is not an image or video", path.display()))
            })?;
        info!("{}: selected {} ({})", side, path.display(), mime);
        Ok(self.upload(MediaSource {
            side,
            origin: MediaOrigin::UploadedFile,
            mime: mime.to_string(),
            bytes,
            path: Some(path.to_path_buf()),
        }))
    }

    /// Store an already loaded upload for its side.
    pub fn upload(&mut self, source: MediaSource) -> &MediaSource {
        let side = source.side;
        let slot = self.slot_mut(side);
        slot.captured = None;
        slot.uploaded.insert(source)
    }

    /// The input analysis should use: a capture wins over an upload.
    pub fn resolve_input(&self, side: Side) -> Option<&MediaSource> {
        let slot = self.slot(side);
        slot.captured.as_ref().or(slot.uploaded.as_ref())
    }
}

impl<D: CameraDevice> Drop for CaptureController<D> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::RgbImage;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Counts live streams so tests can assert nothing leaks.
    #[derive(Clone, Default)]
    pub(crate) struct FakeCameras {
        pub live: Rc<Cell<usize>>,
        pub opened: Rc<Cell<usize>>,
        pub fail: Rc<Cell<bool>>,
        pub requests: Rc<RefCell<Vec<StreamRequest>>>,
    }

    pub(crate) struct FakeStream {
        live: Rc<Cell<usize>>,
        running: bool,
        size: (u32, u32),
    }

    impl FrameSource for FakeStream {
        fn frame(&mut self) -> anyhow::Result<RgbImage> {
            anyhow::ensure!(self.running, "stopped");
            Ok(RgbImage::from_pixel(self.size.0, self.size.1, image::Rgb([90, 120, 150])))
        }

        fn stop(&mut self) {
            if self.running {
                self.running = false;
                self.live.set(self.live.get() - 1);
            }
        }

        fn is_live(&self) -> bool {
            self.running
        }

        fn resolution(&self) -> (u32, u32) {
            self.size
        }
    }

    impl FakeCameras {
        pub fn stream(&self) -> anyhow::Result<Box<dyn FrameSource>> {
            anyhow::ensure!(!self.fail.get(), "permission denied");
            self.live.set(self.live.get() + 1);
            self.opened.set(self.opened.get() + 1);
            Ok(Box::new(FakeStream {
                live: self.live.clone(),
                running: true,
                size: (64, 48),
            }))
        }
    }

    impl CameraDevice for FakeCameras {
        fn open(&self, request: &StreamRequest) -> anyhow::Result<Box<dyn FrameSource>> {
            self.requests.borrow_mut().push(request.clone());
            self.stream()
        }
    }

    pub(crate) fn request() -> StreamRequest {
        StreamRequest {
            device: "/dev/video-fake".to_string(),
            width: 640,
            height: 480,
        }
    }

    pub(crate) fn upload(side: Side, bytes: &[u8]) -> MediaSource {
        MediaSource {
            side,
            origin: MediaOrigin::UploadedFile,
            mime: "image/png".to_string(),
            bytes: bytes.to_vec(),
            path: None,
        }
    }

    fn controller() -> (CaptureController<FakeCameras>, FakeCameras) {
        let cams = FakeCameras::default();
        (CaptureController::new(cams.clone(), request(), 90), cams)
    }

    #[test]
    fn test_start_requests_video_at_640x480() {
        let (mut ctl, cams) = controller();
        ctl.start(Side::Original).unwrap();
        assert_eq!(ctl.state(Side::Original), CaptureState::Streaming);
        assert_eq!(ctl.state(Side::Test), CaptureState::Idle);
        let req = cams.requests.borrow()[0].clone();
        assert_eq!((req.width, req.height), (640, 480));
        assert_eq!(ctl.preview(Side::Original).unwrap().width, 64);
    }

    #[test]
    fn test_device_failure_stays_idle() {
        let (mut ctl, cams) = controller();
        cams.fail.set(true);
        let err = ctl.start(Side::Test).unwrap_err();
        assert!(matches!(err, CheckError::Device(_)));
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(ctl.state(Side::Test), CaptureState::Idle);
        assert!(!ctl.is_start_pending(Side::Test));
    }

    #[test]
    fn test_capture_overrides_upload_and_keeps_streaming() {
        let (mut ctl, cams) = controller();
        ctl.upload(upload(Side::Test, b"uploaded"));
        ctl.start(Side::Test).unwrap();
        let captured = ctl.capture(Side::Test).unwrap();
        assert_eq!(captured.origin, MediaOrigin::CapturedImage);
        assert_eq!(captured.mime, "image/jpeg");

        assert_eq!(ctl.state(Side::Test), CaptureState::Captured);
        assert!(ctl.is_streaming(Side::Test));
        assert_eq!(cams.live.get(), 1);

        let resolved = ctl.resolve_input(Side::Test).unwrap();
        assert_eq!(resolved.origin, MediaOrigin::CapturedImage);
        let decoded = image::load_from_memory(&resolved.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_capture_requires_stream() {
        let (mut ctl, _) = controller();
        assert!(matches!(ctl.capture(Side::Original), Err(CheckError::Device(_))));
    }

    #[test]
    fn test_stop_releases_and_clears_preview() {
        let (mut ctl, cams) = controller();
        ctl.start(Side::Original).unwrap();
        ctl.stop(Side::Original);
        assert_eq!(cams.live.get(), 0);
        assert!(ctl.preview(Side::Original).is_none());
        assert_eq!(ctl.state(Side::Original), CaptureState::Idle);
        // already idle
        ctl.stop(Side::Original);
        assert_eq!(ctl.state(Side::Original), CaptureState::Idle);
    }

    #[test]
    fn test_stop_after_capture_keeps_capture() {
        let (mut ctl, cams) = controller();
        ctl.start(Side::Original).unwrap();
        ctl.capture(Side::Original).unwrap();
        ctl.stop(Side::Original);
        assert_eq!(cams.live.get(), 0);
        assert_eq!(ctl.state(Side::Original), CaptureState::Captured);
        assert!(ctl.resolve_input(Side::Original).is_some());
    }

    #[test]
    fn test_restart_discards_capture_and_old_stream() {
        let (mut ctl, cams) = controller();
        ctl.upload(upload(Side::Original, b"file"));
        ctl.start(Side::Original).unwrap();
        ctl.capture(Side::Original).unwrap();
        ctl.start(Side::Original).unwrap();

        assert_eq!(cams.opened.get(), 2);
        assert_eq!(cams.live.get(), 1);
        assert_eq!(ctl.state(Side::Original), CaptureState::Streaming);
        let resolved = ctl.resolve_input(Side::Original).unwrap();
        assert_eq!(resolved.origin, MediaOrigin::UploadedFile);
    }

    #[test]
    fn test_upload_after_capture_wins() {
        let (mut ctl, _) = controller();
        ctl.start(Side::Test).unwrap();
        ctl.capture(Side::Test).unwrap();
        ctl.upload(upload(Side::Test, b"newer"));
        let resolved = ctl.resolve_input(Side::Test).unwrap();
        assert_eq!(resolved.bytes, b"newer");
    }

    #[test]
    fn test_resolve_none_without_input() {
        let (ctl, _) = controller();
        assert!(ctl.resolve_input(Side::Original).is_none());
    }

    #[test]
    fn test_last_start_wins() {
        let (mut ctl, cams) = controller();
        let first = ctl.begin_start(Side::Test);
        let second = ctl.begin_start(Side::Test);

        let outcome = ctl.complete_start(second, cams.stream()).unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        let outcome = ctl.complete_start(first, cams.stream()).unwrap();
        assert_eq!(outcome, StartOutcome::Superseded);

        assert_eq!(cams.live.get(), 1);
        assert_eq!(ctl.state(Side::Test), CaptureState::Streaming);
    }

    #[test]
    fn test_stop_cancels_pending_start() {
        let (mut ctl, cams) = controller();
        let ticket = ctl.begin_start(Side::Original);
        ctl.stop(Side::Original);
        let outcome = ctl.complete_start(ticket, cams.stream()).unwrap();
        assert_eq!(outcome, StartOutcome::Superseded);
        assert_eq!(cams.live.get(), 0);
    }

    #[test]
    fn test_drop_releases_every_stream() {
        let (mut ctl, cams) = controller();
        ctl.start(Side::Original).unwrap();
        ctl.start(Side::Test).unwrap();
        assert_eq!(cams.live.get(), 2);
        drop(ctl);
        assert_eq!(cams.live.get(), 0);
    }

    #[test]
    fn test_select_file_sniffs_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        image::DynamicImage::new_rgb8(2, 2).save(&path).unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, "hello").unwrap();

        let (mut ctl, _) = controller();
        assert_eq!(ctl.select_file(Side::Original, &path).unwrap().mime, "image/png");
        assert!(matches!(ctl.select_file(Side::Test, &notes), Err(CheckError::Media(_))));
        assert!(matches!(
            ctl.select_file(Side::Test, &dir.path().join("missing.png")),
            Err(CheckError::Io(_))
        ));
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("Original".parse::<Side>().unwrap(), Side::Original);
        assert_eq!("t".parse::<Side>().unwrap(), Side::Test);
        assert!("left".parse::<Side>().is_err());
    }
}
