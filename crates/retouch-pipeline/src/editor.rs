//! Interactive mask editor.
//!
//! [`MaskEditor`] turns screen-space pointer input into image-space
//! [`Stroke`]s and keeps one full-resolution [`Mask`] per zone color,
//! plus the composite of all of them. Pointer samples are converted
//! through the current [`ViewTransform`] as they arrive, so zooming,
//! panning, or resizing the viewport never changes a stored stroke.
//!
//! Masks are rebuilt from the stored strokes on every pointer release,
//! undo, and clear. A zone whose mask cannot be rasterized is dropped
//! from [`MaskEditor::zones`] and reported by
//! [`MaskEditor::rasterization_errors`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::composite::composite_masks;
use crate::mask::{Mask, rasterize};
use crate::transform::{ViewTransform, Viewport};
use crate::types::{
    Dimensions, MaskRasterizationError, Point, Stroke, StrokeInputError, Tool, Zone, ZoneColor,
};

/// What a pointer drag does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorTool {
    /// Add to the active color's zone.
    #[default]
    Paint,
    /// Remove from the active color's zone.
    Erase,
    /// Move the view; draws nothing.
    Pan,
}

impl EditorTool {
    const fn stroke_tool(self) -> Option<Tool> {
        match self {
            Self::Paint => Some(Tool::Paint),
            Self::Erase => Some(Tool::Erase),
            Self::Pan => None,
        }
    }
}

/// Per-photo editing session for zone masks.
#[derive(Debug, Clone)]
pub struct MaskEditor {
    dimensions: Dimensions,
    viewport: Viewport,
    transform: ViewTransform,
    threshold: u8,
    tool: EditorTool,
    color: ZoneColor,
    brush_size: f64,
    strokes: Vec<Stroke>,
    active: Option<Stroke>,
    pan_anchor: Option<Point>,
    instructions: BTreeMap<ZoneColor, String>,
    masks: BTreeMap<ZoneColor, Arc<Mask>>,
    errors: BTreeMap<ZoneColor, MaskRasterizationError>,
    composite: Arc<Mask>,
}

impl MaskEditor {
    /// Default brush diameter in screen pixels.
    pub const DEFAULT_BRUSH_SIZE: f64 = 40.0;

    /// Smallest brush diameter in screen pixels.
    pub const MIN_BRUSH_SIZE: f64 = 1.0;

    /// Largest brush diameter in screen pixels.
    pub const MAX_BRUSH_SIZE: f64 = 200.0;

    /// Start editing a photo of `dimensions` shown in `viewport`.
    /// `threshold` is the mask inclusion threshold used for the
    /// composite and for deciding whether a zone is empty.
    #[must_use]
    pub fn new(dimensions: Dimensions, viewport: Viewport, threshold: u8) -> Self {
        Self {
            dimensions,
            viewport,
            transform: ViewTransform::fit(dimensions, viewport),
            threshold,
            tool: EditorTool::default(),
            color: ZoneColor::Red,
            brush_size: Self::DEFAULT_BRUSH_SIZE,
            strokes: Vec::new(),
            active: None,
            pan_anchor: None,
            instructions: BTreeMap::new(),
            masks: BTreeMap::new(),
            errors: BTreeMap::new(),
            composite: Arc::new(Mask::blank(dimensions)),
        }
    }

    /// Photo dimensions every mask is rasterized at.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Current viewport.
    #[must_use]
    pub const fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Current screen/image mapping.
    #[must_use]
    pub const fn transform(&self) -> ViewTransform {
        self.transform
    }

    /// The viewport was resized: refit the photo. Stored strokes are
    /// unaffected.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.transform = ViewTransform::fit(self.dimensions, viewport);
    }

    /// Switch to a different photo. All strokes, instructions, and
    /// masks belong to the old photo and are discarded.
    pub fn set_photo(&mut self, dimensions: Dimensions) {
        log::debug!("editor switched to a {dimensions} photo");
        *self = Self {
            tool: self.tool,
            color: self.color,
            brush_size: self.brush_size,
            ..Self::new(dimensions, self.viewport, self.threshold)
        };
    }

    /// Zoom by `delta` steps around the viewport center.
    pub fn zoom_by(&mut self, delta: f64) {
        if delta.is_finite() {
            self.transform = self.transform.zoomed(delta, self.viewport.center());
        }
    }

    /// Pan by a screen-space delta.
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        if dx.is_finite() && dy.is_finite() {
            self.transform = self.transform.panned(dx, dy);
        }
    }

    /// Active tool.
    #[must_use]
    pub const fn tool(&self) -> EditorTool {
        self.tool
    }

    /// Select the tool used by the next drag.
    pub fn set_tool(&mut self, tool: EditorTool) {
        self.tool = tool;
    }

    /// Active zone color.
    #[must_use]
    pub const fn color(&self) -> ZoneColor {
        self.color
    }

    /// Select the zone the next stroke belongs to.
    pub fn set_color(&mut self, color: ZoneColor) {
        self.color = color;
    }

    /// Brush diameter in screen pixels.
    #[must_use]
    pub const fn brush_size(&self) -> f64 {
        self.brush_size
    }

    /// Set the brush diameter in screen pixels, clamped to
    /// [`MIN_BRUSH_SIZE`](Self::MIN_BRUSH_SIZE)..=[`MAX_BRUSH_SIZE`](Self::MAX_BRUSH_SIZE).
    /// Non-finite sizes are ignored.
    pub fn set_brush_size(&mut self, size: f64) {
        if size.is_finite() {
            self.brush_size = size.clamp(Self::MIN_BRUSH_SIZE, Self::MAX_BRUSH_SIZE);
        }
    }

    /// Whether a stroke is in progress.
    #[must_use]
    pub const fn is_drawing(&self) -> bool {
        self.active.is_some()
    }

    /// Pointer pressed at a screen position.
    pub fn pointer_down(&mut self, screen: Point) {
        if !screen.is_finite() {
            drop_sample(StrokeInputError::NonFinite {
                x: screen.x,
                y: screen.y,
            });
            return;
        }
        let Some(tool) = self.tool.stroke_tool() else {
            self.pan_anchor = Some(screen);
            return;
        };
        // A press without a release: keep what was drawn so far.
        if self.active.is_some() {
            self.commit_active();
        }
        self.active = Some(Stroke::new(
            vec![self.transform.to_image(screen)],
            self.transform.brush_to_image(self.brush_size),
            tool,
            self.color,
        ));
    }

    /// Pointer moved to a screen position.
    pub fn pointer_move(&mut self, screen: Point) {
        if let Err(err) = self.extend(screen, "move") {
            drop_sample(err);
        }
    }

    /// Pointer released at a screen position. Commits the stroke and
    /// rebuilds the masks.
    pub fn pointer_up(&mut self, screen: Point) {
        if self.pan_anchor.is_some() {
            if let Err(err) = self.extend(screen, "up") {
                drop_sample(err);
            }
            self.pan_anchor = None;
            return;
        }
        if self.active.is_none() {
            drop_sample(StrokeInputError::NoActiveStroke("up"));
            return;
        }
        if let Err(err) = self.extend(screen, "up") {
            drop_sample(err);
        }
        self.commit_active();
    }

    /// Remove the most recent stroke. Returns `false` if there was none.
    pub fn undo_last_stroke(&mut self) -> bool {
        if self.strokes.pop().is_some() {
            self.rebuild_masks();
            true
        } else {
            false
        }
    }

    /// Remove every stroke. Instructions are kept.
    pub fn clear(&mut self) {
        self.active = None;
        self.strokes.clear();
        self.rebuild_masks();
    }

    /// Set the instruction for a zone. A blank instruction excludes the
    /// zone from [`zones`](Self::zones).
    pub fn set_instruction(&mut self, color: ZoneColor, instruction: impl Into<String>) {
        self.instructions.insert(color, instruction.into());
    }

    /// The instruction for a zone, if one was set.
    #[must_use]
    pub fn instruction(&self, color: ZoneColor) -> Option<&str> {
        self.instructions.get(&color).map(String::as_str)
    }

    /// Committed strokes, in drawing order.
    #[must_use]
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    /// The mask for one color, if that color has strokes.
    #[must_use]
    pub fn mask(&self, color: ZoneColor) -> Option<&Arc<Mask>> {
        self.masks.get(&color)
    }

    /// Every rasterized mask, in palette order. Includes masks that were
    /// fully erased.
    pub fn masks(&self) -> impl Iterator<Item = (ZoneColor, &Arc<Mask>)> {
        self.masks.iter().map(|(color, mask)| (*color, mask))
    }

    /// Colors whose masks could not be rasterized.
    #[must_use]
    pub const fn rasterization_errors(&self) -> &BTreeMap<ZoneColor, MaskRasterizationError> {
        &self.errors
    }

    /// The union of all zone masks, pure black and white.
    #[must_use]
    pub fn composite_mask(&self) -> &Mask {
        &self.composite
    }

    /// Snapshot the zones ready for a run: colors with a non-empty mask
    /// and a non-blank instruction, in palette order.
    #[must_use]
    pub fn zones(&self) -> Vec<Zone> {
        self.masks
            .iter()
            .filter(|(_, mask)| !mask.is_empty(self.threshold))
            .filter_map(|(color, mask)| {
                let instruction = self.instructions.get(color)?.trim();
                (!instruction.is_empty()).then(|| Zone {
                    color: *color,
                    instruction: instruction.to_string(),
                    mask: Arc::clone(mask),
                })
            })
            .collect()
    }

    fn extend(&mut self, screen: Point, event: &'static str) -> Result<(), StrokeInputError> {
        if !screen.is_finite() {
            return Err(StrokeInputError::NonFinite {
                x: screen.x,
                y: screen.y,
            });
        }
        if let Some(anchor) = self.pan_anchor {
            self.pan_by(screen.x - anchor.x, screen.y - anchor.y);
            self.pan_anchor = Some(screen);
            return Ok(());
        }
        let image = self.transform.to_image(screen);
        let stroke = self
            .active
            .as_mut()
            .ok_or(StrokeInputError::NoActiveStroke(event))?;
        stroke.push(image);
        Ok(())
    }

    fn commit_active(&mut self) {
        if let Some(stroke) = self.active.take() {
            log::trace!(
                "committed {} stroke with {} point(s)",
                stroke.color(),
                stroke.points().len()
            );
            self.strokes.push(stroke);
            self.rebuild_masks();
        }
    }

    fn rebuild_masks(&mut self) {
        self.masks.clear();
        self.errors.clear();
        for color in ZoneColor::ALL {
            let mut strokes = self.strokes.iter().filter(|s| s.color() == color).peekable();
            if strokes.peek().is_none() {
                continue;
            }
            match rasterize(self.dimensions, strokes) {
                Ok(mask) => {
                    self.masks.insert(color, Arc::new(mask));
                }
                Err(err) => {
                    log::warn!("{color} zone excluded: {err}");
                    self.errors.insert(color, err);
                }
            }
        }
        self.composite = match composite_masks(
            self.dimensions,
            self.masks.values().map(|m| &**m),
            self.threshold,
        ) {
            Ok(mask) => Arc::new(mask),
            Err(err) => {
                log::warn!("composite mask unavailable: {err}");
                Arc::new(Mask::blank(self.dimensions))
            }
        };
    }
}

fn drop_sample(err: StrokeInputError) {
    log::trace!("dropped pointer sample: {err}");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const THRESHOLD: u8 = 26;

    /// 200x100 photo in a 200x100 viewport: fit scale 0.95.
    fn editor() -> MaskEditor {
        MaskEditor::new(
            Dimensions::new(200, 100),
            Viewport::new(200.0, 100.0),
            THRESHOLD,
        )
    }

    fn drag(editor: &mut MaskEditor, from: Point, to: Point) {
        editor.pointer_down(from);
        editor.pointer_move(Point::new((from.x + to.x) / 2.0, (from.y + to.y) / 2.0));
        editor.pointer_up(to);
    }

    fn screen_of(editor: &MaskEditor, x: f64, y: f64) -> Point {
        editor.transform().to_screen(Point::new(x, y))
    }

    /// Drag between two image-space points under the current view.
    fn drag_image(editor: &mut MaskEditor, from: (f64, f64), to: (f64, f64)) {
        let from = screen_of(editor, from.0, from.1);
        let to = screen_of(editor, to.0, to.1);
        drag(editor, from, to);
    }

    #[test]
    fn stroke_is_stored_in_image_space() {
        let mut ed = editor();
        ed.set_brush_size(19.0);
        let from = screen_of(&ed, 20.0, 50.0);
        let to = screen_of(&ed, 120.0, 50.0);
        drag(&mut ed, from, to);

        let stroke = &ed.strokes()[0];
        assert!(stroke.points()[0].distance(Point::new(20.0, 50.0)) < 1e-9);
        assert!(stroke.points()[2].distance(Point::new(120.0, 50.0)) < 1e-9);
        assert!((stroke.width() - 20.0).abs() < 1e-9);
        assert_eq!(stroke.color(), ZoneColor::Red);
    }

    #[test]
    fn mask_is_at_photo_resolution() {
        let mut ed = editor();
        let from = screen_of(&ed, 20.0, 50.0);
        let to = screen_of(&ed, 120.0, 50.0);
        drag(&mut ed, from, to);
        let mask = ed.mask(ZoneColor::Red).unwrap();
        assert_eq!(mask.dimensions(), Dimensions::new(200, 100));
        assert!(mask.is_included(70, 50, THRESHOLD));
        assert!(!mask.is_included(70, 5, THRESHOLD));
    }

    #[test]
    fn brush_width_follows_zoom() {
        let mut zoomed = editor();
        zoomed.zoom_by(2.0);
        let scale = zoomed.transform().scale();
        zoomed.set_brush_size(30.0);
        let from = screen_of(&zoomed, 20.0, 50.0);
        let to = screen_of(&zoomed, 120.0, 50.0);
        drag(&mut zoomed, from, to);
        // Same screen brush covers fewer image pixels when zoomed in.
        assert!((zoomed.strokes()[0].width() - 30.0 / scale).abs() < 1e-9);
        let mask = zoomed.mask(ZoneColor::Red).unwrap();
        assert!(mask.is_included(70, 50 + 4, THRESHOLD));
        assert!(!mask.is_included(70, 50 + 12, THRESHOLD));
    }

    #[test]
    fn viewport_change_keeps_strokes_and_masks() {
        let mut ed = editor();
        let from = screen_of(&ed, 20.0, 50.0);
        let to = screen_of(&ed, 120.0, 50.0);
        drag(&mut ed, from, to);
        let before = ed.strokes().to_vec();
        let mask_before = ed.mask(ZoneColor::Red).unwrap().as_image().clone();

        ed.set_viewport(Viewport::new(1000.0, 700.0));
        ed.pan_by(33.0, -12.0);
        ed.zoom_by(-0.3);

        assert_eq!(ed.strokes(), before.as_slice());
        assert_eq!(
            ed.mask(ZoneColor::Red).unwrap().as_image().as_raw(),
            mask_before.as_raw()
        );
    }

    #[test]
    fn fully_erased_zone_is_excluded() {
        let mut ed = editor();
        ed.set_instruction(ZoneColor::Red, "remove the lamp");
        ed.set_brush_size(10.0);
        let from = screen_of(&ed, 20.0, 50.0);
        let to = screen_of(&ed, 120.0, 50.0);
        drag(&mut ed, from, to);
        assert_eq!(ed.zones().len(), 1);

        ed.set_tool(EditorTool::Erase);
        ed.set_brush_size(60.0);
        drag(&mut ed, from, to);
        assert!(ed.mask(ZoneColor::Red).unwrap().is_empty(THRESHOLD));
        assert!(ed.zones().is_empty());
        assert!(ed.composite_mask().is_empty(THRESHOLD));
    }

    #[test]
    fn blank_instruction_excludes_zone() {
        let mut ed = editor();
        drag_image(&mut ed, (20.0, 50.0), (60.0, 50.0));
        assert!(ed.zones().is_empty());
        ed.set_instruction(ZoneColor::Red, "   \n");
        assert!(ed.zones().is_empty());
        ed.set_instruction(ZoneColor::Red, " remove the lamp ");
        let zones = ed.zones();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].instruction, "remove the lamp");
    }

    #[test]
    fn composite_covers_all_colors() {
        let mut ed = editor();
        ed.set_brush_size(8.0);
        drag_image(&mut ed, (10.0, 20.0), (60.0, 20.0));
        ed.set_color(ZoneColor::Blue);
        drag_image(&mut ed, (10.0, 80.0), (60.0, 80.0));

        let composite = ed.composite_mask();
        assert!(composite.is_included(30, 20, THRESHOLD));
        assert!(composite.is_included(30, 80, THRESHOLD));
        assert!(!composite.is_included(30, 50, THRESHOLD));
        assert!(composite.as_image().pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn undo_and_clear_rebuild_masks() {
        let mut ed = editor();
        drag_image(&mut ed, (10.0, 20.0), (60.0, 20.0));
        ed.set_color(ZoneColor::Green);
        drag_image(&mut ed, (10.0, 80.0), (60.0, 80.0));
        assert!(ed.undo_last_stroke());
        assert!(ed.mask(ZoneColor::Green).is_none());
        assert!(ed.mask(ZoneColor::Red).is_some());
        ed.set_instruction(ZoneColor::Red, "keep me");
        ed.clear();
        assert!(ed.strokes().is_empty());
        assert!(ed.composite_mask().is_empty(THRESHOLD));
        assert_eq!(ed.instruction(ZoneColor::Red), Some("keep me"));
        assert!(!ed.undo_last_stroke());
    }

    #[test]
    fn non_finite_and_orphan_samples_are_dropped() {
        let mut ed = editor();
        ed.pointer_move(Point::new(10.0, 10.0));
        ed.pointer_up(Point::new(10.0, 10.0));
        assert!(ed.strokes().is_empty());

        ed.pointer_down(Point::new(f64::NAN, 3.0));
        assert!(!ed.is_drawing());

        ed.pointer_down(Point::new(10.0, 10.0));
        ed.pointer_move(Point::new(f64::INFINITY, 10.0));
        ed.pointer_up(Point::new(20.0, 10.0));
        assert_eq!(ed.strokes()[0].points().len(), 2);
    }

    #[test]
    fn pan_tool_moves_view_without_drawing() {
        let mut ed = editor();
        ed.set_tool(EditorTool::Pan);
        let before = ed.transform().offset();
        ed.pointer_down(Point::new(50.0, 50.0));
        ed.pointer_move(Point::new(60.0, 45.0));
        ed.pointer_up(Point::new(70.0, 40.0));
        assert!(ed.strokes().is_empty());
        let after = ed.transform().offset();
        assert!((after.x - before.x - 20.0).abs() < 1e-9);
        assert!((after.y - before.y + 10.0).abs() < 1e-9);
    }

    #[test]
    fn zoom_is_anchored_at_viewport_center() {
        let mut ed = editor();
        let center = ed.viewport().center();
        let under = ed.transform().to_image(center);
        ed.zoom_by(1.0);
        assert!(ed.transform().to_screen(under).distance(center) < 1e-9);
    }

    #[test]
    fn change_photo_discards_everything() {
        let mut ed = editor();
        ed.set_instruction(ZoneColor::Red, "remove the lamp");
        drag_image(&mut ed, (10.0, 20.0), (60.0, 20.0));
        ed.set_brush_size(12.0);
        ed.set_photo(Dimensions::new(50, 50));
        assert!(ed.strokes().is_empty());
        assert!(ed.instruction(ZoneColor::Red).is_none());
        assert_eq!(ed.composite_mask().dimensions(), Dimensions::new(50, 50));
        assert!((ed.brush_size() - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn click_without_drag_paints_a_dot() {
        let mut ed = editor();
        ed.set_instruction(ZoneColor::Red, "remove the lamp");
        let p = screen_of(&ed, 100.0, 50.0);
        ed.pointer_down(p);
        ed.pointer_up(p);
        assert!(ed.mask(ZoneColor::Red).unwrap().is_included(100, 50, THRESHOLD));
        assert_eq!(ed.zones().len(), 1);
    }

    #[test]
    fn brush_size_is_clamped() {
        let mut ed = editor();
        ed.set_brush_size(0.0);
        assert!((ed.brush_size() - MaskEditor::MIN_BRUSH_SIZE).abs() < f64::EPSILON);
        ed.set_brush_size(f64::NAN);
        assert!((ed.brush_size() - MaskEditor::MIN_BRUSH_SIZE).abs() < f64::EPSILON);
        ed.set_brush_size(1e6);
        assert!((ed.brush_size() - MaskEditor::MAX_BRUSH_SIZE).abs() < f64::EPSILON);
    }
}
