use crate::yunet;
use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// YuNet input resolution (square).
pub const DETECTOR_INPUT: u32 = 640;
/// SFace input resolution (square).
pub const ENCODER_INPUT: u32 = 112;
/// Length of an SFace descriptor.
pub const DESCRIPTOR_LEN: usize = 128;

/// A detected face in source-image pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,...,x5,y5; eyes first
}

/// L2-normalised face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDescriptor {
    pub vector: Array1<f32>,
}

impl FaceDescriptor {
    /// Builds a descriptor, normalising the vector to unit length.
    pub fn from_vec(raw: Vec<f32>) -> Self {
        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let vector = if norm > 0.0 {
            raw.into_iter().map(|x| x / norm).collect()
        } else {
            raw.into_iter().collect()
        };
        Self { vector }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    /// Cosine similarity in `[-1, 1]`. Both sides are unit vectors, so this is a dot product.
    pub fn similarity(&self, other: &FaceDescriptor) -> f32 {
        let dot: f32 = self
            .vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| a * b)
            .sum();
        dot.clamp(-1.0, 1.0)
    }

    /// Cosine distance in `[0, 2]`; `0` means identical direction.
    pub fn distance(&self, other: &FaceDescriptor) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// Letterbox placement of the source image inside the square detector canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = target as f32 / width.max(height) as f32;
        let new_w = (width as f32 * scale) as u32;
        let new_h = (height as f32 * scale) as u32;
        Self {
            scale,
            offset_x: (target - new_w.min(target)) / 2,
            offset_y: (target - new_h.min(target)) / 2,
        }
    }

    /// Maps a normalised canvas coordinate back into the source image.
    fn unmap(&self, norm: f32, offset: u32, target: u32) -> f32 {
        (norm * target as f32 - offset as f32) / self.scale
    }

    fn unmap_x(&self, norm: f32, target: u32) -> f32 {
        self.unmap(norm, self.offset_x, target)
    }

    fn unmap_y(&self, norm: f32, target: u32) -> f32 {
        self.unmap(norm, self.offset_y, target)
    }
}

/// Planar BGR float tensor `[1, 3, H, W]` with raw `0..255` values.
fn bgr_tensor(img: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    let (b, rest) = data.split_at_mut(plane);
    let (g, r) = rest.split_at_mut(plane);
    for (i, px) in img.pixels().enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }
    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect faces in an image with YuNet.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let target = DETECTOR_INPUT;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("empty image");
    }
    let letterbox = Letterbox::fit(width, height, target);

    let resized = img.resize_exact(
        ((width as f32 * letterbox.scale) as u32).max(1),
        ((height as f32 * letterbox.scale) as u32).max(1),
        image::imageops::FilterType::Triangle,
    );
    let mut canvas = DynamicImage::new_rgb8(target, target);
    image::imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );

    let input = Value::from_array(bgr_tensor(&canvas.to_rgb8())?)?;
    let outputs = session.run(ort::inputs![input])?;

    let mut tensors: Vec<(Vec<i64>, Vec<f32>)> = Vec::with_capacity(outputs.len());
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        tensors.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let views: Vec<(&[i64], &[f32])> = tensors
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let heads = yunet::parse_outputs(&views, target as usize).context("parsing yunet outputs")?;
    let raw = yunet::decode(&heads, score_threshold, target as usize)?;
    log::debug!("yunet: {} raw candidates above {}", raw.len(), score_threshold);

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = letterbox.unmap_x(d.landmarks[k * 2], target);
                landmarks[k * 2 + 1] = letterbox.unmap_y(d.landmarks[k * 2 + 1], target);
            }
            Detection {
                bbox: [
                    letterbox.unmap_x(d.bbox[0], target),
                    letterbox.unmap_y(d.bbox[1], target),
                    d.bbox[2] * target as f32 / letterbox.scale,
                    d.bbox[3] * target as f32 / letterbox.scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        Ok(nms(detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep
            .iter()
            .all(|kept| iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotate, scale and crop the face so the eyes land on the ArcFace reference points.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
    const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

    let left = (detection.landmarks[0], detection.landmarks[1]);
    let right = (detection.landmarks[2], detection.landmarks[3]);
    let (dx, dy) = (right.0 - left.0, right.1 - left.1);
    let eye_dist = (dx * dx + dy * dy).sqrt();
    if eye_dist <= f32::EPSILON {
        anyhow::bail!("degenerate landmarks: eyes coincide");
    }

    let unit = size as f32 / ENCODER_INPUT as f32;
    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    let scale = unit * ref_dist / eye_dist;
    let angle = dy.atan2(dx);

    let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
    );

    // out = M * in + t, with M = scale * R(-angle)
    let (a, b) = (scale * angle.cos(), scale * angle.sin());
    let (c, d) = (-b, a);
    let tx = ref_center.0 - (a * center.0 + b * center.1);
    let ty = ref_center.1 - (c * center.0 + d * center.1);
    let det = a * d - b * c;

    let src = img.to_rgb8();
    let (w, h) = src.dimensions();
    let mut out = RgbImage::new(size, size);

    for oy in 0..size {
        for ox in 0..size {
            let (px, py) = (ox as f32 - tx, oy as f32 - ty);
            let ix = (d * px - b * py) / det;
            let iy = (-c * px + a * py) / det;
            if ix < 0.0 || iy < 0.0 || ix >= w as f32 || iy >= h as f32 {
                continue;
            }
            out.put_pixel(ox, oy, bilinear(&src, ix, iy));
        }
    }

    Ok(DynamicImage::ImageRgb8(out))
}

fn bilinear(src: &RgbImage, x: f32, y: f32) -> image::Rgb<u8> {
    let (w, h) = src.dimensions();
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let weights = [
        ((x0, y0), (1.0 - fx) * (1.0 - fy)),
        ((x1, y0), fx * (1.0 - fy)),
        ((x0, y1), (1.0 - fx) * fy),
        ((x1, y1), fx * fy),
    ];
    let mut acc = [0.0f32; 3];
    for ((sx, sy), wgt) in weights {
        let p = src.get_pixel(sx, sy);
        for ch in 0..3 {
            acc[ch] += p[ch] as f32 * wgt;
        }
    }
    image::Rgb(acc.map(|v| v.clamp(0.0, 255.0) as u8))
}

/// Encode an aligned face crop into a descriptor with SFace.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<FaceDescriptor> {
    let crop = face_img
        .resize_exact(ENCODER_INPUT, ENCODER_INPUT, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let input = Value::from_array(bgr_tensor(&crop)?)?;

    let outputs = session.run(ort::inputs![input])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // [1, 128]
    let len = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if len > data.len() {
        anyhow::bail!("encoder output shorter than declared shape {:?}", shape);
    }

    Ok(FaceDescriptor::from_vec(data[..len].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let v = iou(&a, &b);
        assert!(v > 0.0 && v < 1.0);
        assert_eq!(iou(&a, &[100.0, 100.0, 10.0, 10.0]), 0.0);
    }

    #[test]
    fn test_nms_keeps_disjoint_faces() {
        let kept = nms(
            vec![
                det([10.0, 10.0, 20.0, 20.0], 0.9),
                det([12.0, 12.0, 20.0, 20.0], 0.8),
                det([100.0, 100.0, 20.0, 20.0], 0.85),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.85);
    }

    #[test]
    fn test_descriptor_is_normalised() {
        let d = FaceDescriptor::from_vec(vec![3.0, 4.0]);
        assert!((d.vector[0] - 0.6).abs() < 1e-6);
        assert!((d.vector[1] - 0.8).abs() < 1e-6);
        assert!(d.distance(&d).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_descriptors_have_unit_distance() {
        let a = FaceDescriptor::from_vec(vec![1.0, 0.0]);
        let b = FaceDescriptor::from_vec(vec![0.0, 2.0]);
        assert!((a.distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = Letterbox::fit(1280, 640, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.offset_x, 0);
        assert_eq!(lb.offset_y, 160);
        // canvas centre maps back to the image centre
        assert!((lb.unmap_x(0.5, 640) - 640.0).abs() < 1e-3);
        assert!((lb.unmap_y(0.5, 640) - 320.0).abs() < 1e-3);
    }

    #[test]
    fn test_align_level_eyes_hits_reference() {
        let img = DynamicImage::new_rgb8(200, 200);
        let mut landmarks = [0.0; 10];
        landmarks[..4].copy_from_slice(&[80.0, 100.0, 120.0, 100.0]);
        let d = Detection {
            bbox: [60.0, 60.0, 80.0, 80.0],
            score: 0.9,
            landmarks,
        };
        let out = align_face(&img, &d, ENCODER_INPUT).unwrap();
        assert_eq!(out.dimensions(), (ENCODER_INPUT, ENCODER_INPUT));
    }

    #[test]
    fn test_align_rejects_coincident_eyes() {
        let img = DynamicImage::new_rgb8(10, 10);
        assert!(align_face(&img, &det([0.0, 0.0, 5.0, 5.0], 0.9), 112).is_err());
    }
}
