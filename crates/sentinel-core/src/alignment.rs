//! Face alignment via 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the ArcFace reference positions and
//! warps the frame into a canonical 112×112 RGB crop.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Closed-form least-squares similarity transform (scale, rotation, translation)
/// taking `src` points onto `dst` points.
///
/// Returns `[a, -b, tx, b, a, ty]`, i.e. the top two rows of
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
/// Degenerate input (all source points coincident) yields a pure translation.
pub fn estimate_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    let n = src.len() as f32;
    let centroid = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (msx, msy) = centroid(src);
    let (mdx, mdy) = centroid(dst);

    let mut var = 0.0f32;
    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    for ((sx, sy), (dx, dy)) in src.iter().zip(dst.iter()) {
        let (px, py) = (sx - msx, sy - msy);
        let (qx, qy) = (dx - mdx, dy - mdy);
        var += px * px + py * py;
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
    }

    let (a, b) = if var > f32::EPSILON {
        (dot / var, cross / var)
    } else {
        (1.0, 0.0)
    };
    let tx = mdx - (a * msx - b * msy);
    let ty = mdy - (b * msx + a * msy);

    [a, -b, tx, b, a, ty]
}

/// Warp `frame` so the given landmarks land on the ArcFace reference positions.
///
/// Returns `None` if the landmark geometry cannot be inverted.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> Option<RgbImage> {
    let m = estimate_similarity(landmarks, &REFERENCE_LANDMARKS_112);
    let projection = Projection::from_matrix([m[0], m[1], m[2], m[3], m[4], m[5], 0.0, 0.0, 1.0])?;

    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    warp_into(
        frame,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut aligned,
    );
    Some(aligned)
}
