//! Screen ↔ image coordinate mapping for the mask editor.
//!
//! The photo is drawn at `offset + image_point * scale` on screen.
//! Every pointer sample goes through [`ViewTransform::to_image`] before
//! it is stored, and brush widths go through
//! [`ViewTransform::brush_to_image`], so strokes are independent of the
//! zoom and pan active when they were drawn.

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, Point};

/// Size of the on-screen drawing area in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in screen pixels.
    pub width: f64,
    /// Height in screen pixels.
    pub height: f64,
}

impl Viewport {
    /// Create a new viewport.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Center of the viewport in screen coordinates.
    #[must_use]
    pub fn center(self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }
}

/// Uniform scale plus translation from image space to screen space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    scale: f64,
    offset: Point,
}

impl ViewTransform {
    /// Fraction of the viewport the fitted photo may occupy.
    pub const FIT_PADDING: f64 = 0.95;

    /// Lower zoom bound.
    pub const MIN_SCALE: f64 = 0.1;

    /// Upper zoom bound.
    pub const MAX_SCALE: f64 = 3.0;

    /// Zoom step multiplier applied to a zoom delta.
    pub const ZOOM_STEP: f64 = 0.5;

    /// Smallest scale a fit can produce, keeping the inverse mapping
    /// finite when the viewport collapses to zero.
    const MIN_FIT_SCALE: f64 = 1e-3;

    /// Create a transform from an explicit scale and offset.
    ///
    /// Non-finite or non-positive scales are replaced by `1.0`.
    #[must_use]
    pub fn new(scale: f64, offset: Point) -> Self {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        Self { scale, offset }
    }

    /// Fit `image` inside `viewport`: uniform scale (never upscaling),
    /// padded by [`FIT_PADDING`](Self::FIT_PADDING), centered.
    #[must_use]
    pub fn fit(image: Dimensions, viewport: Viewport) -> Self {
        if image.is_empty() {
            return Self::new(1.0, Point::new(0.0, 0.0));
        }
        let w = f64::from(image.width);
        let h = f64::from(image.height);
        let scale = (viewport.width / w).min(viewport.height / h).min(1.0) * Self::FIT_PADDING;
        let scale = if scale.is_finite() {
            scale.max(Self::MIN_FIT_SCALE)
        } else {
            1.0
        };
        let offset = Point::new(
            w.mul_add(-scale, viewport.width) / 2.0,
            h.mul_add(-scale, viewport.height) / 2.0,
        );
        Self { scale, offset }
    }

    /// Screen pixels per image pixel.
    #[must_use]
    pub const fn scale(self) -> f64 {
        self.scale
    }

    /// Screen position of the image origin.
    #[must_use]
    pub const fn offset(self) -> Point {
        self.offset
    }

    /// `(screen - offset) / scale`
    #[must_use]
    pub fn to_image(self, screen: Point) -> Point {
        Point::new(
            (screen.x - self.offset.x) / self.scale,
            (screen.y - self.offset.y) / self.scale,
        )
    }

    /// `image * scale + offset`
    #[must_use]
    pub fn to_screen(self, image: Point) -> Point {
        Point::new(
            image.x.mul_add(self.scale, self.offset.x),
            image.y.mul_add(self.scale, self.offset.y),
        )
    }

    /// Convert a screen brush width to image pixels.
    #[must_use]
    pub fn brush_to_image(self, screen_width: f64) -> f64 {
        screen_width / self.scale
    }

    /// Convert an image brush width to screen pixels.
    #[must_use]
    pub fn brush_to_screen(self, image_width: f64) -> f64 {
        image_width * self.scale
    }

    /// Zoom by `delta` steps around a screen-space `anchor`, keeping the
    /// image point under the anchor fixed on screen.
    #[must_use]
    pub fn zoomed(self, delta: f64, anchor: Point) -> Self {
        let scale = delta
            .mul_add(Self::ZOOM_STEP, self.scale)
            .clamp(Self::MIN_SCALE, Self::MAX_SCALE);
        let pinned = self.to_image(anchor);
        let offset = Point::new(
            pinned.x.mul_add(-scale, anchor.x),
            pinned.y.mul_add(-scale, anchor.y),
        );
        Self { scale, offset }
    }

    /// Translate by a screen-space delta.
    #[must_use]
    pub fn panned(self, dx: f64, dy: f64) -> Self {
        Self {
            scale: self.scale,
            offset: Point::new(self.offset.x + dx, self.offset.y + dy),
        }
    }
}
