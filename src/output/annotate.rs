use super::SinkError;
use crate::classifier::{BodyPoint, Landmark, LandmarkSet};
use crate::types::Verdict;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

const BORDER_WIDTH: u32 = 6;
const DOT_RADIUS: i64 = 3;

fn verdict_color(verdict: Verdict) -> Rgb<u8> {
    match verdict {
        Verdict::Good => Rgb([40, 200, 90]),
        Verdict::Bad => Rgb([220, 50, 50]),
        Verdict::Absent => Rgb([128, 128, 128]),
    }
}

/// Copy of `frame` with landmarks, the torso line and a verdict-coloured border.
pub fn annotate_frame(
    frame: &RgbImage,
    landmarks: Option<&LandmarkSet>,
    verdict: Verdict,
) -> RgbImage {
    let _span = tracing::debug_span!("annotate").entered();

    let mut out = frame.clone();
    let color = verdict_color(verdict);
    let (width, height) = out.dimensions();

    if let Some(landmarks) = landmarks {
        for landmark in landmarks.points() {
            if let Some((x, y)) = to_pixel(landmark, width, height) {
                draw_dot(&mut out, x, y, Rgb([255, 255, 255]));
            }
        }

        let torso = [
            BodyPoint::LeftShoulder,
            BodyPoint::RightShoulder,
            BodyPoint::LeftHip,
            BodyPoint::RightHip,
        ]
        .map(|p| landmarks.get(p).and_then(|l| to_pixel(l, width, height)));

        if let [Some(ls), Some(rs), Some(lh), Some(rh)] = torso {
            let shoulders = ((ls.0 + rs.0) / 2, (ls.1 + rs.1) / 2);
            let hips = ((lh.0 + rh.0) / 2, (lh.1 + rh.1) / 2);
            draw_line(&mut out, shoulders, hips, color);
        }
    }

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let edge = x < BORDER_WIDTH
            || y < BORDER_WIDTH
            || x + BORDER_WIDTH >= width
            || y + BORDER_WIDTH >= height;
        if edge {
            *pixel = color;
        }
    }

    out
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, SinkError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| SinkError::Encode(e.to_string()))?;
    Ok(bytes)
}

fn to_pixel(landmark: &Landmark, width: u32, height: u32) -> Option<(i64, i64)> {
    if !landmark.x.is_finite() || !landmark.y.is_finite() {
        return None;
    }
    let x = (landmark.x * width as f32).round() as i64;
    let y = (landmark.y * height as f32).round() as i64;
    (x >= 0 && y >= 0 && x < width as i64 && y < height as i64).then_some((x, y))
}

fn put(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_dot(image: &mut RgbImage, cx: i64, cy: i64, color: Rgb<u8>) {
    for dy in -DOT_RADIUS..=DOT_RADIUS {
        for dx in -DOT_RADIUS..=DOT_RADIUS {
            if dx * dx + dy * dy <= DOT_RADIUS * DOT_RADIUS {
                put(image, cx + dx, cy + dy, color);
            }
        }
    }
}

// Bresenham
fn draw_line(image: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put(image, x, y, color);
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::torso;

    #[test]
    fn border_reflects_verdict() {
        let frame = RgbImage::new(64, 48);

        let good = annotate_frame(&frame, None, Verdict::Good);
        let bad = annotate_frame(&frame, None, Verdict::Bad);

        assert_eq!(*good.get_pixel(0, 0), verdict_color(Verdict::Good));
        assert_eq!(*bad.get_pixel(63, 47), verdict_color(Verdict::Bad));
        assert_eq!(*bad.get_pixel(32, 24), Rgb([0, 0, 0]));
    }

    #[test]
    fn torso_line_is_drawn() {
        let frame = RgbImage::new(100, 100);
        let landmarks = torso(0.5);

        let out = annotate_frame(&frame, Some(&landmarks), Verdict::Good);

        // midpoint of the spine between (50, 30) and (50, 70)
        assert_eq!(*out.get_pixel(50, 50), verdict_color(Verdict::Good));
    }

    #[test]
    fn offscreen_landmarks_are_skipped() {
        let frame = RgbImage::new(10, 10);
        let landmarks = LandmarkSet::new(vec![Landmark {
            x: 5.0,
            y: -1.0,
            z: 0.0,
            visibility: 1.0,
        }]);

        let out = annotate_frame(&frame, Some(&landmarks), Verdict::Absent);

        assert_eq!(out.dimensions(), (10, 10));
    }

    #[test]
    fn jpeg_has_magic_bytes() {
        let bytes = encode_jpeg(&RgbImage::new(16, 16), 80).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
