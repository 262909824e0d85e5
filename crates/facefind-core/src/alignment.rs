//! Face normalization: eye-line alignment and aspect-preserving resize.
//!
//! Every face goes through the same two steps before embedding: the crop is
//! rotated about its centre until the eyes sit on a horizontal line, then
//! scaled and zero-padded to the canonical embedding input size.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use thiserror::Error;

/// Canonical embedding input size (width, height).
pub const CANONICAL_SIZE: (u32, u32) = (224, 224);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("degenerate face region: {width}x{height}")]
    Degenerate { width: u32, height: u32 },
}

/// Angle of the eye line in degrees, measured from the +x axis with y pointing down.
pub fn eye_angle(left_eye: (f32, f32), right_eye: (f32, f32)) -> f32 {
    let dx = right_eye.0 - left_eye.0;
    let dy = right_eye.1 - left_eye.1;
    dy.atan2(dx).to_degrees()
}

/// 2×3 affine matrix rotating by `-angle_deg` about `center`.
///
/// ```text
/// |  cos  sin  tx |
/// | -sin  cos  ty |
/// ```
/// Applied to a point on a line at `angle_deg`, the result lies on a horizontal line.
fn rotation_about(center: (f32, f32), angle_deg: f32) -> [f32; 6] {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let (cx, cy) = center;
    let tx = cx - cos * cx - sin * cy;
    let ty = cy + sin * cx - cos * cy;
    [cos, sin, tx, -sin, cos, ty]
}

/// Warp an RGB image through a 2×3 rotation matrix, keeping its dimensions.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are filled with 0 (black).
fn warp_rotation(src: &RgbImage, matrix: &[f32; 6]) -> RgbImage {
    let (width, height) = src.dimensions();
    let [a, b, tx, _, _, ty] = *matrix;

    let mut output = RgbImage::new(width, height);

    for oy in 0..height {
        for ox in 0..width {
            // The linear part is orthonormal, so its inverse is its transpose.
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = a * dx - b * dy;
            let sy = b * dx + a * dy;

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let sample = |x: i64, y: i64, c: usize| -> f32 {
                if x >= 0 && x < width as i64 && y >= 0 && y < height as i64 {
                    src.get_pixel(x as u32, y as u32)[c] as f32
                } else {
                    0.0
                }
            };

            let mut px = [0u8; 3];
            for (c, out) in px.iter_mut().enumerate() {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                *out = val.round().clamp(0.0, 255.0) as u8;
            }
            output.put_pixel(ox, oy, Rgb(px));
        }
    }

    output
}

/// Rotate a face crop about its centre so the eye line becomes horizontal.
///
/// The output keeps the crop's dimensions; rotated-in corners are black.
pub fn align(
    face: &RgbImage,
    left_eye: (f32, f32),
    right_eye: (f32, f32),
) -> Result<RgbImage, NormalizeError> {
    let (width, height) = face.dimensions();
    if width == 0 || height == 0 {
        return Err(NormalizeError::Degenerate { width, height });
    }

    let angle = eye_angle(left_eye, right_eye);
    if angle == 0.0 {
        return Ok(face.clone());
    }

    let center = ((width as f32 / 2.0).round(), (height as f32 / 2.0).round());
    Ok(warp_rotation(face, &rotation_about(center, angle)))
}

/// Scale `image` to fit `target` (width, height) and zero-pad the short side.
///
/// Padding is split evenly; an odd remainder goes to the right or bottom edge.
pub fn resize_preserving_aspect(
    image: &RgbImage,
    target: (u32, u32),
) -> Result<RgbImage, NormalizeError> {
    let (width, height) = image.dimensions();
    let (target_w, target_h) = target;
    if width == 0 || height == 0 || target_w == 0 || target_h == 0 {
        return Err(NormalizeError::Degenerate { width, height });
    }

    // Compare width/height ratios without floating point: w * th vs tw * h.
    let lhs = width as u64 * target_h as u64;
    let rhs = target_w as u64 * height as u64;

    let (new_w, new_h) = if lhs == rhs {
        (target_w, target_h)
    } else if lhs < rhs {
        let scale = target_h as f64 / height as f64;
        ((width as f64 * scale) as u32, target_h)
    } else {
        let scale = target_w as f64 / width as f64;
        (target_w, (height as f64 * scale) as u32)
    };

    if new_w == 0 || new_h == 0 {
        return Err(NormalizeError::Degenerate { width, height });
    }

    let scaled = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    if (new_w, new_h) == target {
        return Ok(scaled);
    }

    let left = (target_w - new_w) / 2;
    let top = (target_h - new_h) / 2;
    let mut canvas = RgbImage::new(target_w, target_h);
    imageops::replace(&mut canvas, &scaled, left as i64, top as i64);
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(m: &[f32; 6], p: (f32, f32)) -> (f32, f32) {
        (
            m[0] * p.0 + m[1] * p.1 + m[2],
            m[3] * p.0 + m[4] * p.1 + m[5],
        )
    }

    #[test]
    fn test_eye_angle() {
        assert!(eye_angle((10.0, 10.0), (20.0, 10.0)).abs() < 1e-6);
        assert!((eye_angle((10.0, 10.0), (20.0, 20.0)) - 45.0).abs() < 1e-4);
        assert!((eye_angle((10.0, 20.0), (20.0, 10.0)) + 45.0).abs() < 1e-4);
    }

    #[test]
    fn test_rotation_levels_eye_line() {
        let left = (30.0f32, 40.0f32);
        let right = (70.0f32, 62.0f32);
        let m = rotation_about((50.0, 50.0), eye_angle(left, right));

        let l = apply(&m, left);
        let r = apply(&m, right);
        assert!((l.1 - r.1).abs() < 1e-3, "eyes at y={} and y={}", l.1, r.1);
        assert!(r.0 > l.0, "left eye must stay left of the right eye");
    }

    #[test]
    fn test_rotation_fixes_center() {
        let m = rotation_about((32.0, 20.0), 33.0);
        let c = apply(&m, (32.0, 20.0));
        assert!((c.0 - 32.0).abs() < 1e-4 && (c.1 - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_align_keeps_dimensions() {
        let face = RgbImage::from_pixel(40, 60, Rgb([90, 120, 150]));
        let aligned = align(&face, (10.0, 20.0), (30.0, 28.0)).unwrap();
        assert_eq!(aligned.dimensions(), (40, 60));
        // Centre pixel is always sampled from inside the source.
        assert_eq!(aligned.get_pixel(20, 30), &Rgb([90, 120, 150]));
    }

    #[test]
    fn test_align_rotated_corners_are_black() {
        let face = RgbImage::from_pixel(50, 50, Rgb([200, 200, 200]));
        let aligned = align(&face, (0.0, 0.0), (10.0, 10.0)).unwrap();
        assert_eq!(aligned.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_align_horizontal_eyes_is_identity() {
        let mut face = RgbImage::new(16, 16);
        for (x, y, px) in face.enumerate_pixels_mut() {
            *px = Rgb([(x * 10) as u8, (y * 10) as u8, 7]);
        }
        let aligned = align(&face, (4.0, 6.0), (12.0, 6.0)).unwrap();
        assert_eq!(aligned, face);
    }

    #[test]
    fn test_align_rejects_empty_crop() {
        let face = RgbImage::new(0, 10);
        assert_eq!(
            align(&face, (0.0, 0.0), (1.0, 0.0)),
            Err(NormalizeError::Degenerate { width: 0, height: 10 })
        );
    }

    #[test]
    fn test_resize_output_is_exact_target() {
        for (w, h) in [(224, 224), (100, 50), (50, 100), (37, 91), (500, 3), (1, 1)] {
            let img = RgbImage::from_pixel(w, h, Rgb([255, 255, 255]));
            let out = resize_preserving_aspect(&img, CANONICAL_SIZE).unwrap();
            assert_eq!(out.dimensions(), CANONICAL_SIZE, "source {w}x{h}");
        }
    }

    #[test]
    fn test_resize_pads_tall_image_horizontally() {
        // 50x100 → 112x224 content, 56 px of padding on each side.
        let img = RgbImage::from_pixel(50, 100, Rgb([255, 255, 255]));
        let out = resize_preserving_aspect(&img, (224, 224)).unwrap();
        assert_eq!(out.get_pixel(55, 100), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(56, 100), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(167, 100), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(168, 100), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_resize_odd_padding_goes_to_bottom() {
        // 224x3 → content width 224, height 3 * (224/224) = 3; pad 221 → 110 top, 111 bottom.
        let img = RgbImage::from_pixel(224, 3, Rgb([255, 255, 255]));
        let out = resize_preserving_aspect(&img, (224, 224)).unwrap();
        assert_eq!(out.get_pixel(10, 109), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(10, 110), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(10, 112), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(10, 113), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_resize_preserves_aspect_of_content() {
        let img = RgbImage::from_pixel(120, 80, Rgb([255, 255, 255]));
        let out = resize_preserving_aspect(&img, (224, 224)).unwrap();
        let content_rows = (0..224)
            .filter(|&y| out.get_pixel(112, y)[0] > 0)
            .count() as f32;
        // 120:80 scaled to width 224 → height 149.
        assert!((content_rows - 149.0).abs() <= 1.0, "rows = {content_rows}");
        assert!((224.0 / content_rows - 1.5).abs() < 0.02);
    }

    #[test]
    fn test_resize_rejects_vanishing_side() {
        let img = RgbImage::from_pixel(1000, 1, Rgb([1, 1, 1]));
        assert!(matches!(
            resize_preserving_aspect(&img, (224, 224)),
            Err(NormalizeError::Degenerate { .. })
        ));
    }

    #[test]
    fn test_resize_rejects_empty_image() {
        let img = RgbImage::new(0, 0);
        assert!(resize_preserving_aspect(&img, CANONICAL_SIZE).is_err());
    }
}
