//! 轮廓提取与绘制 (Polygon extractor)

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;

use crate::{Point2, Segment};

/// Outer borders of top-level components only (no holes, nothing nested in a hole).
pub fn external_contours(mask: &GrayImage) -> Vec<Segment> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| {
            c.points
                .iter()
                .map(|p| Point2::new(p.x as f32, p.y as f32))
                .collect()
        })
        .collect()
}

/// The external contour with the most points, or an empty segment.
pub fn largest_segment(mask: &GrayImage) -> Segment {
    external_contours(mask)
        .into_iter()
        .reduce(|best, c| if c.len() > best.len() { c } else { best })
        .unwrap_or_default()
}

pub fn masks2segments(masks: &[GrayImage]) -> Vec<Segment> {
    masks.iter().map(largest_segment).collect()
}

/// Shoelace area of a closed polygon.
pub fn contour_area(points: &[Point2]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        sum += p.x() as f64 * q.y() as f64 - q.x() as f64 * p.y() as f64;
    }
    sum.abs() / 2.0
}

/// Keeps contours with `min < area < max`.
pub fn filter_by_area(contours: Vec<Segment>, (min, max): (f64, f64)) -> Vec<Segment> {
    contours
        .into_iter()
        .filter(|c| {
            let area = contour_area(c);
            area > min && area < max
        })
        .collect()
}

/// Rasterizes a segment into a `width x height` {0, 255} mask.
pub fn fill_polygon(width: u32, height: u32, segment: &[Point2]) -> GrayImage {
    let mut mask = GrayImage::new(width, height);

    let mut poly: Vec<Point<i32>> = Vec::with_capacity(segment.len());
    for p in segment {
        let q = Point::new(p.x().round() as i32, p.y().round() as i32);
        if poly.last() != Some(&q) {
            poly.push(q);
        }
    }
    // imageproc 要求首尾不重合
    while poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }

    match poly.len() {
        0 => {}
        1 => {
            let p = poly[0];
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < width && (p.y as u32) < height {
                mask.put_pixel(p.x as u32, p.y as u32, Luma([255]));
            }
        }
        2 => draw_line_segment_mut(
            &mut mask,
            (poly[0].x as f32, poly[0].y as f32),
            (poly[1].x as f32, poly[1].y as f32),
            Luma([255]),
        ),
        _ => draw_polygon_mut(&mut mask, &poly, Luma([255])),
    }
    mask
}

/// Draws each segment as a closed polyline.
pub fn draw_polylines(image: &mut RgbImage, segments: &[Segment], color: Rgb<u8>, thickness: u32) {
    let r = (thickness.max(1) as i32 - 1) / 2;
    let extra = (thickness.max(1) as i32 - 1) % 2;
    for seg in segments {
        if seg.is_empty() {
            continue;
        }
        for (i, p) in seg.iter().enumerate() {
            let q = &seg[(i + 1) % seg.len()];
            for dy in -r..=r + extra {
                for dx in -r..=r + extra {
                    draw_line_segment_mut(
                        image,
                        (p.x() + dx as f32, p.y() + dy as f32),
                        (q.x() + dx as f32, q.y() + dy as f32),
                        color,
                    );
                }
            }
        }
    }
}
