//! Shared types for the retouch pipeline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::{GenerationFailure, GenerationStrategy};
use crate::mask::Mask;
use crate::ordering::ZoneOrdering;
use crate::state::Phase;

/// Re-export `GrayImage` so downstream crates can reference mask
/// rasters without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can reference photos and
/// working images without depending on `image` directly.
pub use image::RgbaImage;

/// A 2D point. Depending on context this is either a screen-space
/// pointer sample or an image-space stroke vertex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Whether both coordinates are finite (not NaN or infinite).
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of an image buffer.
    #[must_use]
    pub fn of<P: image::Pixel>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        Self::new(image.width(), image.height())
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The fixed zone palette.
///
/// Each zone is identified by the color it was painted with. The
/// declaration order is the palette order, which is also the
/// tie-breaker when two zones have the same estimated complexity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ZoneColor {
    /// `#ef4444`
    Red,
    /// `#3b82f6`
    Blue,
    /// `#22c55e`
    Green,
    /// `#eab308`
    Yellow,
    /// `#a855f7`
    Purple,
}

impl ZoneColor {
    /// Every palette entry, in palette order.
    pub const ALL: [Self; 5] = [Self::Red, Self::Blue, Self::Green, Self::Yellow, Self::Purple];

    /// Lowercase name, as used in reports and serialized scripts.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Purple => "purple",
        }
    }

    /// Display color of the brush as `#rrggbb`.
    #[must_use]
    pub const fn hex(self) -> &'static str {
        match self {
            Self::Red => "#ef4444",
            Self::Blue => "#3b82f6",
            Self::Green => "#22c55e",
            Self::Yellow => "#eab308",
            Self::Purple => "#a855f7",
        }
    }
}

impl fmt::Display for ZoneColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a stroke adds to or removes from its zone's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// Draws white (included) pixels.
    #[default]
    Paint,
    /// Draws black (excluded) pixels over earlier paint.
    Erase,
}

/// A freehand stroke stored in image space.
///
/// Points and width are in full-resolution photo pixels, so a stroke
/// stays valid across any later zoom, pan, or viewport change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    points: Vec<Point>,
    width: f64,
    tool: Tool,
    color: ZoneColor,
}

impl Stroke {
    /// Create a stroke from image-space points and an image-space width.
    #[must_use]
    pub const fn new(points: Vec<Point>, width: f64, tool: Tool, color: ZoneColor) -> Self {
        Self {
            points,
            width,
            tool,
            color,
        }
    }

    /// Image-space vertices, in drawing order.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Brush width in image-space pixels.
    #[must_use]
    pub const fn width(&self) -> f64 {
        self.width
    }

    /// Paint or erase.
    #[must_use]
    pub const fn tool(&self) -> Tool {
        self.tool
    }

    /// The zone this stroke belongs to.
    #[must_use]
    pub const fn color(&self) -> ZoneColor {
        self.color
    }

    pub(crate) fn push(&mut self, point: Point) {
        self.points.push(point);
    }
}

/// One zone ready for the pipeline: its color, instruction, and an
/// immutable snapshot of its full-resolution mask.
#[derive(Debug, Clone)]
pub struct Zone {
    /// Palette color identifying the zone.
    pub color: ZoneColor,
    /// The user's free-text instruction for this zone.
    pub instruction: String,
    /// Rasterized mask at photo resolution.
    pub mask: Arc<Mask>,
}

/// The imported photograph.
///
/// `full` is the immutable full-resolution raster every mask and every
/// generation call works against. `display` is a downscaled copy for
/// interactive rendering only.
#[derive(Debug, Clone)]
pub struct Photo {
    full: Arc<RgbaImage>,
    display: RgbaImage,
}

impl Photo {
    /// Wrap a decoded raster, deriving a display copy whose longest
    /// axis is at most `display_max_dimension` pixels.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] if the raster has a zero
    /// dimension.
    pub fn new(full: RgbaImage, display_max_dimension: u32) -> Result<Self, PipelineError> {
        if Dimensions::of(&full).is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let display = display_raster(&full, display_max_dimension);
        Ok(Self {
            full: Arc::new(full),
            display,
        })
    }

    /// Decode raw image bytes (PNG, JPEG, BMP, WebP).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] if `bytes` is empty or the
    /// image has a zero dimension. Returns [`PipelineError::ImageDecode`]
    /// if the format is unrecognized or the data is corrupt.
    pub fn decode(bytes: &[u8], display_max_dimension: u32) -> Result<Self, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let decoded = image::load_from_memory(bytes)?;
        Self::new(decoded.to_rgba8(), display_max_dimension)
    }

    /// The full-resolution raster.
    #[must_use]
    pub fn full(&self) -> &RgbaImage {
        &self.full
    }

    /// Shared handle to the full-resolution raster.
    pub(crate) fn shared_full(&self) -> Arc<RgbaImage> {
        Arc::clone(&self.full)
    }

    /// The downscaled display raster.
    #[must_use]
    pub const fn display(&self) -> &RgbaImage {
        &self.display
    }

    /// Full-resolution dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.full.width(), self.full.height())
    }
}

/// Downscale so the longest axis is at most `max_dimension`, or copy
/// unchanged if it already fits.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn display_raster(full: &RgbaImage, max_dimension: u32) -> RgbaImage {
    let (w, h) = full.dimensions();
    let long_axis = w.max(h);
    if max_dimension == 0 || long_axis <= max_dimension {
        return full.clone();
    }
    let ratio = f64::from(max_dimension) / f64::from(long_axis);
    let new_w = ((f64::from(w) * ratio).round() as u32).max(1);
    let new_h = ((f64::from(h) * ratio).round() as u32).max(1);
    image::imageops::resize(full, new_w, new_h, image::imageops::FilterType::Triangle)
}

/// Configuration for the edit pipeline.
///
/// All parameters have defaults matching the behavior the editor was
/// tuned against; see the `DEFAULT_*` associated constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Generation attempts per zone before the zone is marked failed.
    pub max_attempts: u32,

    /// Upper bound on a single generation call, enforced by the
    /// orchestrator regardless of any transport-level timeout.
    #[serde(with = "crate::diagnostics::duration_serde")]
    pub call_timeout: Duration,

    /// Order in which zones are edited.
    pub ordering: ZoneOrdering,

    /// Whether zone masks are sent along with zone edit requests.
    pub strategy: GenerationStrategy,

    /// Minimum mask channel value treated as "included" (~10% of 255).
    pub mask_threshold: u8,

    /// Longest axis of the display raster derived from the photo.
    pub display_max_dimension: u32,

    /// JPEG quality used when a photo is encoded for the wire.
    pub jpeg_quality: u8,
}

impl PipelineConfig {
    /// Default for [`max_attempts`](Self::max_attempts).
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

    /// Default for [`call_timeout`](Self::call_timeout).
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(90);

    /// Default for [`mask_threshold`](Self::mask_threshold).
    pub const DEFAULT_MASK_THRESHOLD: u8 = 26;

    /// Default for [`display_max_dimension`](Self::display_max_dimension).
    pub const DEFAULT_DISPLAY_MAX_DIMENSION: u32 = 1536;

    /// Default for [`jpeg_quality`](Self::jpeg_quality).
    pub const DEFAULT_JPEG_QUALITY: u8 = 80;

    /// Check the invariants a run depends on.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] when `max_attempts` is
    /// zero, `call_timeout` is zero, or `jpeg_quality` is outside 1–100.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "call_timeout must be positive".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(PipelineError::InvalidConfig(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            call_timeout: Self::DEFAULT_CALL_TIMEOUT,
            ordering: ZoneOrdering::default(),
            strategy: GenerationStrategy::default(),
            mask_threshold: Self::DEFAULT_MASK_THRESHOLD,
            display_max_dimension: Self::DEFAULT_DISPLAY_MAX_DIMENSION,
            jpeg_quality: Self::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Errors that abort a pipeline operation.
///
/// Per-zone problems never show up here; they are recorded in the
/// outcome log instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Submit or refine was requested before a photo was imported.
    #[error("no photo loaded")]
    NoPhoto,

    /// A refinement was requested with a blank instruction.
    #[error("refinement instruction is empty")]
    EmptyInstruction,

    /// The operation does not apply to the current phase.
    #[error("`{operation}` is not valid in phase {phase}")]
    InvalidPhase {
        /// The attempted operation.
        operation: &'static str,
        /// The phase the pipeline was in.
        phase: Phase,
    },

    /// A persisted snapshot does not match the zones it is resumed with.
    #[error("cannot resume from snapshot: {0}")]
    InvalidSnapshot(String),

    /// The base upgrade request was malformed. The run stops in
    /// [`Phase::BaseUpgrade`] and can be resumed.
    #[error("base upgrade request rejected: {0}")]
    BaseUpgradeRejected(GenerationFailure),

    /// The run was abandoned by a session reset.
    #[error("run cancelled by session reset")]
    Cancelled,
}

/// A malformed pointer sample. Never surfaced to the user; the sample
/// is dropped.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum StrokeInputError {
    /// The pointer position contained NaN or infinity.
    #[error("pointer sample ({x}, {y}) is not finite")]
    NonFinite {
        /// Reported horizontal position.
        x: f64,
        /// Reported vertical position.
        y: f64,
    },

    /// A move or release arrived without a preceding press.
    #[error("pointer {0} without an active stroke")]
    NoActiveStroke(&'static str),
}

/// No drawing surface could be allocated for a zone's mask. The zone
/// is excluded from the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum MaskRasterizationError {
    /// The surface allocator rejected the requested size.
    #[error("cannot allocate a {0} drawing surface")]
    Surface(Dimensions),
}

/// A zone result could not be composited. The zone is marked failed and
/// the working image is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum CompositingError {
    /// The generated image does not match the working image.
    #[error("edited image is {edited} but working image is {working}")]
    ImageSize {
        /// Working image dimensions.
        working: Dimensions,
        /// Generated image dimensions.
        edited: Dimensions,
    },

    /// The zone mask does not match the working image.
    #[error("mask is {mask} but working image is {working}")]
    MaskSize {
        /// Working image dimensions.
        working: Dimensions,
        /// Mask dimensions.
        mask: Dimensions,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_nan_is_not_finite() {
        assert!(!Point::new(f64::NAN, 1.0).is_finite());
        assert!(!Point::new(1.0, f64::INFINITY).is_finite());
        assert!(Point::new(-3.0, 2.5).is_finite());
    }

    #[test]
    fn dimensions_display() {
        assert_eq!(Dimensions::new(640, 480).to_string(), "640x480");
    }

    #[test]
    fn palette_order_matches_declaration() {
        let mut shuffled = vec![ZoneColor::Purple, ZoneColor::Red, ZoneColor::Green];
        shuffled.sort();
        assert_eq!(
            shuffled,
            vec![ZoneColor::Red, ZoneColor::Green, ZoneColor::Purple]
        );
    }

    #[test]
    fn zone_color_serializes_lowercase() {
        let json = serde_json::to_string(&ZoneColor::Blue).unwrap();
        assert_eq!(json, "\"blue\"");
    }

    #[test]
    fn photo_rejects_zero_sized_raster() {
        let result = Photo::new(RgbaImage::new(0, 10), 1536);
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn photo_decode_empty_input() {
        let result = Photo::decode(&[], 1536);
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn photo_decode_corrupt_input() {
        let result = Photo::decode(&[0xFF, 0x00], 1536);
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
    }

    #[test]
    fn display_raster_is_downscaled_but_full_is_not() {
        let photo = Photo::new(RgbaImage::new(400, 200), 100).unwrap();
        assert_eq!(photo.dimensions(), Dimensions::new(400, 200));
        assert_eq!(Dimensions::of(photo.display()), Dimensions::new(100, 50));
    }

    #[test]
    fn small_photo_display_is_a_copy() {
        let photo = Photo::new(RgbaImage::new(40, 30), 1536).unwrap();
        assert_eq!(Dimensions::of(photo.display()), Dimensions::new(40, 30));
    }

    #[test]
    fn config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.mask_threshold, 26);
        assert_eq!(config.ordering, ZoneOrdering::InstructionLength);
        assert_eq!(config.strategy, GenerationStrategy::MaskGuided);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_zero_attempts() {
        let config = PipelineConfig {
            max_attempts: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_serde_round_trip() {
        let config = PipelineConfig {
            max_attempts: 3,
            call_timeout: Duration::from_millis(1500),
            ordering: ZoneOrdering::MaskArea,
            strategy: GenerationStrategy::TextOnly,
            ..PipelineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn compositing_error_display() {
        let err = CompositingError::ImageSize {
            working: Dimensions::new(10, 10),
            edited: Dimensions::new(8, 10),
        };
        assert_eq!(
            err.to_string(),
            "edited image is 8x10 but working image is 10x10"
        );
    }
}
