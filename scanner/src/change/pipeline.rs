use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::morphology;
use imageproc::point::Point;
use imageproc::rect::Rect;

const MASK_ON: u8 = 255;
const HIGHLIGHT: Rgb<u8> = Rgb([255, 0, 0]);
const PEN_WIDTH: u32 = 2;

/// Binary change mask: 255 where `|frame - background| > threshold`, 0 elsewhere.
///
/// Both images must have the same dimensions; the caller checks this.
pub fn change_mask(background: &GrayImage, frame: &GrayImage, threshold: u8) -> GrayImage {
    debug_assert_eq!(background.dimensions(), frame.dimensions());
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let diff = background.get_pixel(x, y).0[0].abs_diff(frame.get_pixel(x, y).0[0]);
        if diff > threshold {
            Luma([MASK_ON])
        } else {
            Luma([0])
        }
    })
}

/// Opening followed by closing with a square structuring element of the given
/// radius (radius 2 is a 5x5 kernel).
///
/// Opening drops specks smaller than the kernel, closing then fills small gaps
/// so one object is not split into several undercounted pieces.
pub fn denoise(mask: &GrayImage, radius: u8) -> GrayImage {
    let opened = morphology::open(mask, Norm::LInf, radius);
    morphology::close(&opened, Norm::LInf, radius)
}

/// Outermost region boundaries of a binary mask. Holes and regions nested
/// inside holes are dropped.
///
/// The mask is traced inside a one-pixel empty frame: `find_contours` reports
/// a region touching the image edge as a hole, so without the frame changes
/// entering from an edge would be lost. Points are returned in mask
/// coordinates.
pub fn outer_contours(mask: &GrayImage) -> Vec<Contour<i32>> {
    let (w, h) = mask.dimensions();
    let mut framed = GrayImage::new(w + 2, h + 2);
    image::imageops::replace(&mut framed, mask, 1, 1);

    find_contours::<i32>(&framed)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .map(|mut c| {
            for p in &mut c.points {
                p.x -= 1;
                p.y -= 1;
            }
            c
        })
        .collect()
}

/// Area enclosed by a closed boundary (shoelace formula over pixel centres).
///
/// A one-pixel-wide boundary encloses nothing, so a solid `w x h` block
/// measures `(w - 1) * (h - 1)`.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

/// Colour copy of `frame` with every contour traced in the highlight colour.
pub fn annotate(frame: &DynamicImage, contours: &[Contour<i32>]) -> RgbImage {
    let mut canvas = frame.to_rgb8();
    for contour in contours {
        for p in &contour.points {
            draw_filled_rect_mut(
                &mut canvas,
                Rect::at(p.x, p.y).of_size(PEN_WIDTH, PEN_WIDTH),
                HIGHLIGHT,
            );
        }
    }
    canvas
}
