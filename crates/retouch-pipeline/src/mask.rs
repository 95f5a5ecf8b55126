//! Zone masks: rasterizing image-space strokes into full-resolution
//! binary rasters.
//!
//! A mask starts black (protected). Each stroke of the zone is drawn in
//! order with round caps and joins: paint strokes in white, erase
//! strokes in black. Rendering goes through `tiny-skia`, so stroke edges
//! are anti-aliased; consumers compare against a threshold rather than
//! testing for pure white.

use image::{ImageEncoder, Luma};
use tiny_skia::{
    Color, FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke as SkiaStroke,
    Transform,
};

use crate::types::{Dimensions, GrayImage, MaskRasterizationError, Point, Stroke, Tool};

/// Value of an included mask pixel.
pub const WHITE: u8 = 255;

/// Value of a protected mask pixel.
pub const BLACK: u8 = 0;

/// A single-channel mask at photo resolution.
#[derive(Debug, Clone)]
pub struct Mask(GrayImage);

/// Axis-aligned pixel bounds of a mask's included region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    /// Leftmost included column.
    pub x: u32,
    /// Topmost included row.
    pub y: u32,
    /// Width in pixels (at least 1).
    pub width: u32,
    /// Height in pixels (at least 1).
    pub height: u32,
}

impl BoundingBox {
    /// Pixel area of the box.
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Mask {
    /// Wrap an existing single-channel raster.
    #[must_use]
    pub const fn new(image: GrayImage) -> Self {
        Self(image)
    }

    /// An all-black mask.
    #[must_use]
    pub fn blank(dimensions: Dimensions) -> Self {
        Self(GrayImage::from_pixel(
            dimensions.width,
            dimensions.height,
            Luma([BLACK]),
        ))
    }

    /// Mask dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.0)
    }

    /// The underlying raster.
    #[must_use]
    pub const fn as_image(&self) -> &GrayImage {
        &self.0
    }

    /// Consume the mask and return the underlying raster.
    #[must_use]
    pub fn into_image(self) -> GrayImage {
        self.0
    }

    /// Whether the pixel at `(x, y)` is at or above `threshold`.
    /// Out-of-bounds coordinates are never included.
    #[must_use]
    pub fn is_included(&self, x: u32, y: u32, threshold: u8) -> bool {
        self.0
            .get_pixel_checked(x, y)
            .is_some_and(|p| p.0[0] >= threshold)
    }

    /// Number of included pixels.
    #[must_use]
    pub fn coverage(&self, threshold: u8) -> u64 {
        self.0.pixels().filter(|p| p.0[0] >= threshold).count() as u64
    }

    /// Returns `true` if no pixel reaches `threshold`.
    #[must_use]
    pub fn is_empty(&self, threshold: u8) -> bool {
        !self.0.pixels().any(|p| p.0[0] >= threshold)
    }

    /// Bounds of the included region, or `None` for an empty mask.
    #[must_use]
    pub fn bounding_box(&self, threshold: u8) -> Option<BoundingBox> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut any = false;
        for (x, y, p) in self.0.enumerate_pixels() {
            if p.0[0] >= threshold {
                any = true;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
        any.then(|| BoundingBox {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        })
    }

    /// Encode as an 8-bit grayscale PNG. Masks always travel losslessly
    /// so compression never blurs the white/black boundary.
    ///
    /// # Errors
    ///
    /// Returns the encoder error if PNG encoding fails.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut png_bytes = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
        encoder.write_image(
            self.0.as_raw(),
            self.0.width(),
            self.0.height(),
            image::ExtendedColorType::L8,
        )?;
        Ok(png_bytes)
    }
}

/// Rasterize one zone's strokes into a mask of the given dimensions.
///
/// Strokes are drawn in iteration order, so a later erase stroke
/// removes earlier paint and a later paint stroke covers earlier
/// erasure. Strokes without points are skipped.
///
/// # Errors
///
/// Returns [`MaskRasterizationError::Surface`] if no drawing surface
/// of the requested size can be allocated (zero-sized or too large).
pub fn rasterize<'a, I>(dimensions: Dimensions, strokes: I) -> Result<Mask, MaskRasterizationError>
where
    I: IntoIterator<Item = &'a Stroke>,
{
    let mut pixmap = Pixmap::new(dimensions.width, dimensions.height)
        .ok_or(MaskRasterizationError::Surface(dimensions))?;
    pixmap.fill(Color::BLACK);

    let mut drawn = 0_usize;
    for stroke in strokes {
        if draw_stroke(&mut pixmap, stroke) {
            drawn += 1;
        }
    }
    log::trace!("rasterized {drawn} stroke(s) into a {dimensions} mask");

    Ok(Mask(pixmap_to_gray(&pixmap)))
}

/// Draw a single stroke. Returns `false` if it produced no geometry.
#[allow(clippy::cast_possible_truncation)]
fn draw_stroke(pixmap: &mut Pixmap, stroke: &Stroke) -> bool {
    let points = dedup_consecutive(stroke.points());
    let Some(first) = points.first() else {
        return false;
    };
    if !(stroke.width().is_finite() && stroke.width() > 0.0) {
        return false;
    }

    let mut paint = Paint::default();
    let value = match stroke.tool() {
        Tool::Paint => WHITE,
        Tool::Erase => BLACK,
    };
    paint.set_color_rgba8(value, value, value, 255);
    paint.anti_alias = true;

    let width = stroke.width() as f32;

    // A click without drag: a round dot the size of the brush.
    if points.len() == 1 {
        let Some(dot) = PathBuilder::from_circle(first.x as f32, first.y as f32, width / 2.0)
        else {
            return false;
        };
        pixmap.fill_path(&dot, &paint, FillRule::Winding, Transform::identity(), None);
        return true;
    }

    let mut pb = PathBuilder::new();
    pb.move_to(first.x as f32, first.y as f32);
    for p in &points[1..] {
        pb.line_to(p.x as f32, p.y as f32);
    }
    let Some(path) = pb.finish() else {
        return false;
    };

    let sk_stroke = SkiaStroke {
        width,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..SkiaStroke::default()
    };
    pixmap.stroke_path(&path, &paint, &sk_stroke, Transform::identity(), None);
    true
}

/// Drop consecutive duplicate vertices so a stationary pointer does not
/// produce zero-length segments.
fn dedup_consecutive(points: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for &p in points {
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    out
}

/// Collapse an opaque grayscale pixmap into a single-channel raster.
///
/// The pixmap is filled opaque black before drawing and only opaque
/// colors are drawn, so premultiplied and straight values coincide and
/// the red channel carries the mask value.
fn pixmap_to_gray(pixmap: &Pixmap) -> GrayImage {
    let data = pixmap.data();
    GrayImage::from_fn(pixmap.width(), pixmap.height(), |x, y| {
        let off = (y as usize * pixmap.width() as usize + x as usize) * 4;
        Luma([data[off]])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ZoneColor;

    const THRESHOLD: u8 = 26;

    fn paint(points: &[(f64, f64)], width: f64) -> Stroke {
        Stroke::new(
            points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            width,
            Tool::Paint,
            ZoneColor::Red,
        )
    }

    fn erase(points: &[(f64, f64)], width: f64) -> Stroke {
        Stroke::new(
            points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            width,
            Tool::Erase,
            ZoneColor::Red,
        )
    }

    #[test]
    fn no_strokes_is_all_black() {
        let mask = rasterize(Dimensions::new(20, 10), []).unwrap();
        assert_eq!(mask.dimensions(), Dimensions::new(20, 10));
        assert!(mask.as_image().pixels().all(|p| p.0[0] == BLACK));
        assert!(mask.is_empty(THRESHOLD));
    }

    #[test]
    fn zero_sized_surface_is_an_error() {
        let result = rasterize(Dimensions::new(0, 10), []);
        assert_eq!(
            result.unwrap_err(),
            MaskRasterizationError::Surface(Dimensions::new(0, 10))
        );
    }

    #[test]
    fn horizontal_line_has_stored_width() {
        let stroke = paint(&[(10.0, 20.0), (50.0, 20.0)], 8.0);
        let mask = rasterize(Dimensions::new(64, 40), [&stroke]).unwrap();
        // Inside the band: |dy| < 4.
        assert!(mask.is_included(30, 20, THRESHOLD));
        assert!(mask.is_included(30, 17, THRESHOLD));
        assert!(mask.is_included(30, 22, THRESHOLD));
        // Well outside the band.
        assert!(!mask.is_included(30, 26, THRESHOLD));
        assert!(!mask.is_included(30, 13, THRESHOLD));
    }

    #[test]
    fn round_caps_extend_past_endpoints() {
        let stroke = paint(&[(20.0, 20.0), (40.0, 20.0)], 10.0);
        let mask = rasterize(Dimensions::new(64, 40), [&stroke]).unwrap();
        assert!(mask.is_included(17, 20, THRESHOLD));
        assert!(mask.is_included(43, 20, THRESHOLD));
        // The cap is round, not square. (15, 15) lies inside a square cap
        // but about 6.4 px from the endpoint, beyond the 5 px radius.
        assert!(!mask.is_included(15, 15, THRESHOLD));
    }

    #[test]
    fn single_point_draws_a_dot() {
        let stroke = paint(&[(15.0, 15.0)], 10.0);
        let mask = rasterize(Dimensions::new(30, 30), [&stroke]).unwrap();
        assert!(mask.is_included(15, 15, THRESHOLD));
        assert!(!mask.is_included(25, 15, THRESHOLD));
    }

    #[test]
    fn stationary_pointer_draws_a_dot() {
        let stroke = paint(&[(15.0, 15.0), (15.0, 15.0), (15.0, 15.0)], 6.0);
        let mask = rasterize(Dimensions::new(30, 30), [&stroke]).unwrap();
        assert!(mask.is_included(15, 15, THRESHOLD));
    }

    #[test]
    fn erase_over_paint_cancels_out() {
        let painted = paint(&[(10.0, 10.0), (30.0, 10.0)], 6.0);
        let erased = erase(&[(10.0, 10.0), (30.0, 10.0)], 14.0);
        let mask = rasterize(Dimensions::new(40, 20), [&painted, &erased]).unwrap();
        assert!(mask.is_empty(THRESHOLD));
    }

    #[test]
    fn paint_after_erase_wins() {
        let erased = erase(&[(10.0, 10.0), (30.0, 10.0)], 14.0);
        let painted = paint(&[(10.0, 10.0), (30.0, 10.0)], 6.0);
        let mask = rasterize(Dimensions::new(40, 20), [&erased, &painted]).unwrap();
        assert!(mask.is_included(20, 10, THRESHOLD));
    }

    #[test]
    fn bounding_box_of_dot() {
        let mut img = GrayImage::new(10, 10);
        img.put_pixel(3, 4, Luma([WHITE]));
        img.put_pixel(6, 5, Luma([WHITE]));
        img.put_pixel(8, 8, Luma([10])); // below threshold
        let bbox = Mask::new(img).bounding_box(THRESHOLD).unwrap();
        assert_eq!(
            bbox,
            BoundingBox {
                x: 3,
                y: 4,
                width: 4,
                height: 2
            }
        );
        assert_eq!(bbox.area(), 8);
    }

    #[test]
    fn empty_mask_has_no_bounding_box() {
        assert!(Mask::blank(Dimensions::new(5, 5)).bounding_box(THRESHOLD).is_none());
    }

    #[test]
    fn threshold_boundary() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(0, 0, Luma([THRESHOLD]));
        img.put_pixel(1, 0, Luma([THRESHOLD - 1]));
        let mask = Mask::new(img);
        assert!(mask.is_included(0, 0, THRESHOLD));
        assert!(!mask.is_included(1, 0, THRESHOLD));
        assert_eq!(mask.coverage(THRESHOLD), 1);
    }

    #[test]
    fn png_encoding_is_lossless() {
        let stroke = paint(&[(3.0, 3.0), (12.0, 9.0)], 3.0);
        let mask = rasterize(Dimensions::new(16, 12), [&stroke]).unwrap();
        let png = mask.to_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.as_raw(), mask.as_image().as_raw());
    }
}
