//! Turning uploaded bytes into frames the engine can look at.

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use std::path::Path;

const VIDEO_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
];

/// Best-effort MIME type: magic bytes for images, extension for video.
pub fn sniff_mime(path: &Path, bytes: &[u8]) -> Option<&'static str> {
    if let Ok(format) = image::guess_format(bytes) {
        return Some(format.to_mime_type());
    }
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if let Some((_, mime)) = VIDEO_TYPES.iter().find(|(e, _)| *e == ext) {
        return Some(mime);
    }
    ImageFormat::from_extension(&ext).map(|f| f.to_mime_type())
}

pub fn is_video(mime: &str) -> bool {
    mime.starts_with("video/")
}

pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).context("decode image")
}

/// Calls `visit` with every `stride`-th decoded frame of the video at `path`.
#[cfg(feature = "video")]
pub fn for_each_video_frame<F>(path: &Path, stride: usize, mut visit: F) -> Result<usize>
where
    F: FnMut(DynamicImage) -> Result<()>,
{
    use ffmpeg_next::{format, media, software::scaling, util::frame::video::Video};

    ffmpeg_next::init().context("init ffmpeg")?;
    let mut input = format::input(path).with_context(|| format!("open video {}", path.display()))?;
    let stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or_else(|| anyhow::anyhow!("no video stream in {}", path.display()))?;
    let stream_index = stream.index();
    let mut decoder = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?
        .decoder()
        .video()?;
    let (width, height) = (decoder.width(), decoder.height());
    let mut scaler = scaling::Context::get(
        decoder.format(),
        width,
        height,
        format::Pixel::RGB24,
        width,
        height,
        scaling::Flags::BILINEAR,
    )?;

    let stride = stride.max(1);
    let mut index = 0usize;
    let mut sampled = 0usize;
    let mut drain = |decoder: &mut ffmpeg_next::decoder::Video| -> Result<()> {
        let mut decoded = Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            if index % stride == 0 {
                let mut rgb = Video::empty();
                scaler.run(&decoded, &mut rgb)?;
                visit(DynamicImage::ImageRgb8(packed_rgb(&rgb, width, height)?))?;
                sampled += 1;
            }
            index += 1;
        }
        Ok(())
    };

    for (s, packet) in input.packets() {
        if s.index() != stream_index {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }
        drain(&mut decoder)?;
    }
    decoder.send_eof().ok();
    drain(&mut decoder)?;

    log::debug!("sampled {} of {} frames from {}", sampled, index, path.display());
    Ok(sampled)
}

#[cfg(feature = "video")]
fn packed_rgb(frame: &ffmpeg_next::util::frame::video::Video, width: u32, height: u32) -> Result<image::RgbImage> {
    let row = (width * 3) as usize;
    let line = frame.stride(0);
    let data = frame.data(0);
    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        pixels.extend_from_slice(&data[y * line..y * line + row]);
    }
    image::RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow::anyhow!("failed to build frame buffer"))
}

#[cfg(not(feature = "video"))]
pub fn for_each_video_frame<F>(path: &Path, _stride: usize, _visit: F) -> Result<usize>
where
    F: FnMut(DynamicImage) -> Result<()>,
{
    anyhow::bail!(
        "cannot decode video {}: built without the `video` feature",
        path.display()
    )
}
