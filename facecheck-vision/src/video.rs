use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// What a caller asks of a camera: video only, at a requested size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// A live video stream.
pub trait FrameSource {
    /// Grab the current frame as RGB.
    fn frame(&mut self) -> Result<RgbImage>;

    /// Release the underlying device buffers. Idempotent.
    fn stop(&mut self);

    fn is_live(&self) -> bool;

    /// Negotiated resolution, which may differ from the request.
    fn resolution(&self) -> (u32, u32);
}

/// Something that can hand out camera streams.
pub trait CameraDevice {
    fn open(&self, request: &StreamRequest) -> Result<Box<dyn FrameSource>>;
}

/// V4L2 cameras addressed by device path.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4lCameras;

impl CameraDevice for V4lCameras {
    fn open(&self, request: &StreamRequest) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(Camera::open(request)?))
    }
}

pub struct Camera {
    stream: Option<Stream<'static>>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(request: &StreamRequest) -> Result<Self> {
        let dev = Device::with_path(&request.device)
            .with_context(|| format!("open camera {}", request.device))?;
        let current = dev.format().context("get format")?;

        // Prefer RGB at the requested size, then YUYV, else keep whatever the driver gives
        let rgb = Format::new(request.width, request.height, FourCC::new(b"RGB3"));
        let mut fmt = dev.set_format(&rgb).unwrap_or(current);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(request.width, request.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        if (fmt.width, fmt.height) != (request.width, request.height) {
            log::warn!(
                "camera {} negotiated {}x{} instead of {}x{}",
                request.device,
                fmt.width,
                fmt.height,
                request.width,
                request.height
            );
        }

        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        Ok(Self {
            stream: Some(stream),
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }
}

impl FrameSource for Camera {
    fn frame(&mut self) -> Result<RgbImage> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("camera stream is stopped"))?;
        let (data, meta) = stream.next().context("capture frame")?;
        log::debug!(
            "captured frame: {}x{} fourcc={:?} seq={} len={}",
            self.width,
            self.height,
            self.fourcc,
            meta.sequence,
            data.len()
        );
        decode_frame(self.fourcc, self.width, self.height, data)
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("camera stream released");
        }
    }

    fn is_live(&self) -> bool {
        self.stream.is_some()
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert a raw driver buffer into an RGB image.
pub fn decode_frame(fourcc: FourCC, width: u32, height: u32, data: &[u8]) -> Result<RgbImage> {
    let mut buf = match &fourcc.repr {
        b"RGB3" => data.to_vec(),
        b"YUYV" => yuyv_to_rgb(width, height, data)?,
        b"GREY" => grey_to_rgb(width, height, data)?,
        _ => anyhow::bail!("unsupported pixel format {:?}", fourcc),
    };
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        anyhow::bail!("frame buffer too small: {} < {}", buf.len(), expected);
    }
    buf.truncate(expected);
    RgbImage::from_raw(width, height, buf).ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(to_u8(y + 1.402 * v));
            out.push(to_u8(y - 0.344136 * u - 0.714136 * v));
            out.push(to_u8(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn to_u8(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}
