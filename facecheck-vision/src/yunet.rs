//! YuNet post-processing.
//!
//! YuNet is anchor-free: every cell of the stride-8/16/32 feature grids
//! predicts a face directly. The exported model emits twelve tensors,
//! grouped by head and ordered by stride:
//!
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32`
//!
//! Scores are already sigmoid-activated; the face score is the geometric
//! mean of class and objectness. Box centres are `(grid + delta) * stride`,
//! sizes are `exp(delta) * stride`, landmarks are `(grid + delta) * stride`.

use anyhow::Result;
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// A decoded candidate, normalised to the square input (`0..1`).
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// Per-stride prediction heads, each `[cells, width]`.
#[derive(Debug, Clone)]
pub struct Heads {
    pub cls: Vec<Array2<f32>>,
    pub obj: Vec<Array2<f32>>,
    pub bbox: Vec<Array2<f32>>,
    pub kps: Vec<Array2<f32>>,
}

fn cells_for(stride: usize, input_size: usize) -> usize {
    let side = input_size / stride;
    side * side
}

fn take_head(
    outputs: &[(&[i64], &[f32])],
    name: &str,
    first: usize,
    width: usize,
    input_size: usize,
) -> Result<Vec<Array2<f32>>> {
    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            let index = first + i;
            let Some((shape, data)) = outputs.get(index) else {
                anyhow::bail!("missing {} output at index {}", name, index);
            };
            let cells = cells_for(stride, input_size);
            if *shape != [1, cells as i64, width as i64] {
                anyhow::bail!(
                    "unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
                    name,
                    index,
                    shape,
                    cells,
                    width
                );
            }
            Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
        })
        .collect()
}

/// Split the raw session outputs into typed heads, validating every shape.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Heads> {
    if outputs.len() < 12 {
        anyhow::bail!("yunet produced {} outputs, expected 12", outputs.len());
    }
    Ok(Heads {
        cls: take_head(outputs, "cls", 0, 1, input_size)?,
        obj: take_head(outputs, "obj", 3, 1, input_size)?,
        bbox: take_head(outputs, "bbox", 6, 4, input_size)?,
        kps: take_head(outputs, "kps", 9, 10, input_size)?,
    })
}

/// Combined face score for one cell.
pub fn face_score(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}

/// Decode all cells scoring at least `score_threshold`.
pub fn decode(heads: &Heads, score_threshold: f32, input_size: usize) -> Result<Vec<RawDetection>> {
    let size = input_size as f32;
    let mut out = Vec::new();

    for (level, &stride) in STRIDES.iter().enumerate() {
        let side = input_size / stride;
        let (cls, obj) = (&heads.cls[level], &heads.obj[level]);
        let (bbox, kps) = (&heads.bbox[level], &heads.kps[level]);
        if cls.nrows() != side * side {
            anyhow::bail!(
                "stride {} expects {} cells, got {}",
                stride,
                side * side,
                cls.nrows()
            );
        }
        let s = stride as f32;

        for row in 0..side {
            for col in 0..side {
                let idx = row * side + col;
                let score = face_score(cls[[idx, 0]], obj[[idx, 0]]);
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + bbox[[idx, 0]]) * s;
                let cy = (row as f32 + bbox[[idx, 1]]) * s;
                let w = bbox[[idx, 2]].exp() * s;
                let h = bbox[[idx, 3]].exp() * s;

                let mut landmarks = [0.0f32; 10];
                for k in 0..5 {
                    landmarks[k * 2] = (col as f32 + kps[[idx, k * 2]]) * s / size;
                    landmarks[k * 2 + 1] = (row as f32 + kps[[idx, k * 2 + 1]]) * s / size;
                }

                out.push(RawDetection {
                    bbox: [
                        (cx - w / 2.0) / size,
                        (cy - h / 2.0) / size,
                        w / size,
                        h / size,
                    ],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(out)
}
