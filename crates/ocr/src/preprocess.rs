use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma, Rgb, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Image is truncated or structurally invalid: {0}")]
    Structure(String),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

/// Rotations smaller than this are not worth resampling for.
const MIN_ROTATION_DEG: f32 = 0.01;

/// Bicubic coefficient (matches the common `a = -0.75` convolution kernel).
const CUBIC_A: f32 = -0.75;

/// Decode an uploaded image, failing on anything truncated or malformed.
///
/// Decoding alone is not enough for JPEG: several decoders pad a truncated
/// entropy stream instead of failing, so the end-of-image marker must follow
/// the last start-of-scan marker.
pub fn decode_verified(data: &[u8]) -> Result<DynamicImage, PreprocessError> {
    let format = image::guess_format(data)?;
    if format == ImageFormat::Jpeg {
        let last_scan = data
            .windows(2)
            .rposition(|w| w == [0xFF, 0xDA])
            .ok_or_else(|| PreprocessError::Structure("JPEG has no scan data".into()))?;
        let has_eoi = data[last_scan..].windows(2).any(|w| w == [0xFF, 0xD9]);
        if !has_eoi {
            return Err(PreprocessError::Structure(
                "JPEG ends before the end-of-image marker".into(),
            ));
        }
    }
    Ok(image::load_from_memory_with_format(data, format)?)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}

// ── Deskew ────────────────────────────────────────────────────────────────────

/// Return a copy of `img` rotated so the text block sits level.
/// A blank image comes back unchanged.
pub fn deskew(img: &RgbImage) -> RgbImage {
    let gray = DynamicImage::ImageRgb8(img.clone()).to_luma8();
    let Some(theta) = min_area_rect_angle(&gray) else {
        tracing::debug!("No foreground pixels; skipping deskew");
        return img.clone();
    };
    let angle = correction_angle(theta);
    if angle.abs() < MIN_ROTATION_DEG {
        return img.clone();
    }
    tracing::debug!("Correcting skew by {angle:.2} degrees");
    rotate_about_center(img, angle)
}

/// Map a minimum-area-rectangle angle in `[-90, 0)` onto the rotation that
/// levels the text. Positive results rotate counter-clockwise.
pub fn correction_angle(theta: f32) -> f32 {
    if theta < -45.0 {
        -(90.0 + theta)
    } else {
        -theta
    }
}

/// Angle of the minimum-area rectangle around every non-white pixel, reported
/// in `[-90, 0)` degrees measured with the y axis pointing up.
///
/// `None` when the image has no foreground or the foreground is degenerate
/// (fewer than three non-collinear points).
pub fn min_area_rect_angle(gray: &GrayImage) -> Option<f32> {
    // The hull of all foreground pixels equals the hull of each row's
    // leftmost and rightmost foreground pixel.
    let mut points = Vec::new();
    for (y, row) in gray.rows().enumerate() {
        let mut first = None;
        let mut last = None;
        for (x, px) in row.enumerate() {
            // Inverted intensity is non-zero.
            if 255 - px[0] > 0 {
                first.get_or_insert(x);
                last = Some(x);
            }
        }
        if let (Some(first), Some(last)) = (first, last) {
            points.push((first as f32, y as f32));
            if last != first {
                points.push((last as f32, y as f32));
            }
        }
    }

    let hull = convex_hull(points);
    if hull.len() < 3 {
        return None;
    }

    // Rotating calipers: the minimum-area rectangle shares a side with the hull.
    let n = hull.len();
    let mut best: Option<(f32, f32)> = None;
    for i in 0..n {
        let (x0, y0) = hull[i];
        let (x1, y1) = hull[(i + 1) % n];
        let (ex, ey) = (x1 - x0, y1 - y0);
        let len = (ex * ex + ey * ey).sqrt();
        if len < f32::EPSILON {
            continue;
        }
        let (ux, uy) = (ex / len, ey / len);
        let (mut min_u, mut max_u, mut min_v, mut max_v) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
        for &(px, py) in &hull {
            let (dx, dy) = (px - x0, py - y0);
            let u = dx * ux + dy * uy;
            let v = -dx * uy + dy * ux;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        let area = (max_u - min_u) * (max_v - min_v);
        if best.map_or(true, |(a, _)| area < a) {
            // Flip y so angles follow the usual counter-clockwise convention.
            let edge_angle = (-ey).atan2(ex).to_degrees();
            best = Some((area, edge_angle));
        }
    }

    best.map(|(_, edge_angle)| edge_angle.rem_euclid(90.0) - 90.0)
}

/// Andrew's monotone chain. Returns the hull counter-clockwise (in image
/// coordinates) without repeating the first point.
fn convex_hull(mut points: Vec<(f32, f32)>) -> Vec<(f32, f32)> {
    points.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    fn cross(o: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    }

    let mut lower: Vec<(f32, f32)> = Vec::new();
    for &p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(f32, f32)> = Vec::new();
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Rotate about the image center by `degrees` (counter-clockwise as
/// displayed), bicubic resampling, border pixels replicated from the edge.
pub fn rotate_about_center(img: &RgbImage, degrees: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    let cx = (w / 2) as f32;
    let cy = (h / 2) as f32;
    let (sin, cos) = degrees.to_radians().sin_cos();

    ImageBuffer::from_fn(w, h, |x, y| {
        let ox = x as f32 - cx;
        let oy = y as f32 - cy;
        let sx = cx + ox * cos - oy * sin;
        let sy = cy + ox * sin + oy * cos;
        sample_bicubic(img, sx, sy)
    })
}

fn cubic_weight(t: f32) -> f32 {
    let t = t.abs();
    if t <= 1.0 {
        ((CUBIC_A + 2.0) * t - (CUBIC_A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((CUBIC_A * t - 5.0 * CUBIC_A) * t + 8.0 * CUBIC_A) * t - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

fn sample_bicubic(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    let clamp_x = |v: i64| v.clamp(0, w as i64 - 1) as u32;
    let clamp_y = |v: i64| v.clamp(0, h as i64 - 1) as u32;

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let mut acc = [0f32; 3];
    for j in -1..=2i64 {
        let wy = cubic_weight(fy - j as f32);
        if wy == 0.0 {
            continue;
        }
        for i in -1..=2i64 {
            let wx = cubic_weight(fx - i as f32);
            if wx == 0.0 {
                continue;
            }
            let p = img.get_pixel(clamp_x(x0 + i), clamp_y(y0 + j));
            for c in 0..3 {
                acc[c] += p[c] as f32 * wx * wy;
            }
        }
    }
    Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

// ── Thresholding ──────────────────────────────────────────────────────────────

pub fn to_grayscale(img: &RgbImage) -> GrayImage {
    DynamicImage::ImageRgb8(img.clone()).to_luma8()
}

/// Binarize against a Gaussian-weighted local mean: a pixel turns white when
/// it is brighter than `mean - offset`, black otherwise.
pub fn adaptive_threshold_gaussian(gray: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    let kernel = gaussian_kernel(block_size);
    let mean: GrayImage = imageproc::filter::separable_filter_equal(gray, &kernel);

    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let src = gray.get_pixel(x, y)[0] as i32;
        let threshold = mean.get_pixel(x, y)[0] as i32 - offset;
        Luma([if src > threshold { 255 } else { 0 }])
    })
}

/// Normalized 1-D Gaussian of odd length `size`; sigma derived from the size
/// the same way scan-processing toolkits usually do.
fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = size.max(3) | 1;
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (size / 2) as f32;
    let raw: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - half;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = raw.iter().sum();
    raw.into_iter().map(|v| v / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// White canvas with a dark band `len`×`thick` px tilted by `tilt` degrees
    /// (positive = baseline falling to the right, as displayed).
    fn tilted_band(size: u32, len: f32, thick: f32, tilt: f32) -> RgbImage {
        let (sin, cos) = tilt.to_radians().sin_cos();
        let c = size as f32 / 2.0;
        ImageBuffer::from_fn(size, size, |x, y| {
            let dx = x as f32 - c;
            let dy = y as f32 - c;
            let along = dx * cos + dy * sin;
            let across = -dx * sin + dy * cos;
            if along.abs() <= len / 2.0 && across.abs() <= thick / 2.0 {
                Rgb([20, 20, 20])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    #[test]
    fn correction_angle_normalization() {
        assert_eq!(correction_angle(-5.0), 5.0);
        assert_eq!(correction_angle(-85.0), -5.0);
        assert_eq!(correction_angle(-90.0), 0.0);
        assert_eq!(correction_angle(-45.0), 45.0);
    }

    #[test]
    fn blank_image_has_no_angle_and_is_unchanged() {
        let img: RgbImage = ImageBuffer::from_pixel(40, 30, Rgb([255, 255, 255]));
        assert_eq!(min_area_rect_angle(&to_grayscale(&img)), None);
        assert_eq!(deskew(&img), img);
    }

    #[test]
    fn single_dot_is_degenerate() {
        let mut img: RgbImage = ImageBuffer::from_pixel(20, 20, Rgb([255, 255, 255]));
        img.put_pixel(5, 5, Rgb([0, 0, 0]));
        assert_eq!(min_area_rect_angle(&to_grayscale(&img)), None);
        assert_eq!(deskew(&img), img);
    }

    #[test]
    fn angle_reported_in_min_area_rect_range() {
        let img = tilted_band(200, 120.0, 20.0, 8.0);
        let theta = min_area_rect_angle(&to_grayscale(&img)).unwrap();
        assert!((-90.0..0.0).contains(&theta), "theta was {theta}");
    }

    #[test]
    fn measures_clockwise_tilt() {
        let img = tilted_band(200, 120.0, 20.0, 8.0);
        let theta = min_area_rect_angle(&to_grayscale(&img)).unwrap();
        let angle = correction_angle(theta);
        assert!((angle - 8.0).abs() < 1.0, "correction was {angle}");
    }

    #[test]
    fn measures_counter_clockwise_tilt() {
        let img = tilted_band(200, 120.0, 20.0, -6.0);
        let theta = min_area_rect_angle(&to_grayscale(&img)).unwrap();
        let angle = correction_angle(theta);
        assert!((angle + 6.0).abs() < 1.0, "correction was {angle}");
    }

    #[test]
    fn deskew_levels_tilted_band() {
        let img = tilted_band(200, 120.0, 20.0, 8.0);
        let leveled = deskew(&img);
        assert_eq!(leveled.dimensions(), img.dimensions());
        let theta = min_area_rect_angle(&to_grayscale(&leveled)).unwrap();
        let residual = correction_angle(theta);
        assert!(residual.abs() < 1.5, "residual skew {residual}");
    }

    #[test]
    fn rotation_replicates_edges_instead_of_black() {
        let img: RgbImage = ImageBuffer::from_pixel(50, 40, Rgb([230, 230, 230]));
        let rotated = rotate_about_center(&img, 20.0);
        assert_eq!(rotated.dimensions(), (50, 40));
        assert_eq!(*rotated.get_pixel(0, 0), Rgb([230, 230, 230]));
        assert_eq!(*rotated.get_pixel(49, 39), Rgb([230, 230, 230]));
    }

    #[test]
    fn zero_rotation_is_identity() {
        let img = tilted_band(60, 30.0, 6.0, 10.0);
        assert_eq!(rotate_about_center(&img, 0.0), img);
    }

    #[test]
    fn threshold_output_is_binary() {
        let gray: GrayImage = ImageBuffer::from_fn(64, 64, |x, y| Luma([((x * 3 + y * 5) % 256) as u8]));
        let out = adaptive_threshold_gaussian(&gray, 11, 2);
        assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn threshold_keeps_dark_text_on_light_background() {
        let mut gray: GrayImage = ImageBuffer::from_pixel(40, 40, Luma([200u8]));
        for x in 10..30 {
            gray.put_pixel(x, 20, Luma([30u8]));
        }
        let out = adaptive_threshold_gaussian(&gray, 11, 2);
        assert_eq!(out.get_pixel(20, 20)[0], 0);
        assert_eq!(out.get_pixel(2, 2)[0], 255);
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(11);
        assert_eq!(k.len(), 11);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((k[0] - k[10]).abs() < 1e-7);
        assert!(k[5] > k[4]);
    }

    #[test]
    fn encode_png_produces_png_header() {
        let img = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(4, 4, Luma([100u8])));
        let bytes = encode_png(&img).unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
    }

    #[test]
    fn verify_accepts_intact_jpeg_and_rejects_truncated() {
        let img = DynamicImage::ImageRgb8(tilted_band(64, 40.0, 8.0, 3.0));
        let mut jpeg = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg).unwrap();
        decode_verified(&jpeg).unwrap();

        let truncated = &jpeg[..jpeg.len() / 2];
        assert!(decode_verified(truncated).is_err());
    }

    #[test]
    fn verify_rejects_garbage() {
        assert!(decode_verified(b"definitely not an image").is_err());
    }
}
