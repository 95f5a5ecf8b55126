//! Scripted editor input.
//!
//! A script fixes the viewport, the per-color instructions, and the
//! screen-space gestures a user would make, so a masking session can be
//! replayed without a UI.

use std::collections::BTreeMap;

use retouch_pipeline::{EditorTool, MaskEditor, Point, Viewport, ZoneColor};
use serde::Deserialize;

/// A recorded masking session.
#[derive(Debug, Deserialize)]
pub struct Script {
    /// Viewport the gestures were recorded in.
    pub viewport: Viewport,
    /// Instruction per zone color.
    #[serde(default)]
    pub instructions: BTreeMap<ZoneColor, String>,
    /// Gestures in the order they happened.
    #[serde(default)]
    pub gestures: Vec<Gesture>,
}

/// One user gesture, in screen coordinates.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Gesture {
    /// A pointer drag. With the pan tool it moves the view.
    Stroke {
        color: ZoneColor,
        #[serde(default)]
        tool: EditorTool,
        /// Brush diameter in screen pixels; the current size if absent.
        brush_size: Option<f64>,
        points: Vec<Point>,
    },
    Zoom {
        delta: f64,
    },
    Pan {
        dx: f64,
        dy: f64,
    },
    Viewport {
        width: f64,
        height: f64,
    },
    Undo,
    Clear,
}

impl Script {
    /// Replay every gesture into `editor`, then set the instructions.
    pub fn apply(&self, editor: &mut MaskEditor) {
        for gesture in &self.gestures {
            gesture.apply(editor);
        }
        for (color, instruction) in &self.instructions {
            editor.set_instruction(*color, instruction.as_str());
        }
    }
}

impl Gesture {
    fn apply(&self, editor: &mut MaskEditor) {
        match self {
            Self::Stroke {
                color,
                tool,
                brush_size,
                points,
            } => {
                let Some((first, rest)) = points.split_first() else {
                    log::warn!("skipping {color} stroke without points");
                    return;
                };
                editor.set_tool(*tool);
                editor.set_color(*color);
                if let Some(size) = brush_size {
                    editor.set_brush_size(*size);
                }
                editor.pointer_down(*first);
                match rest.split_last() {
                    Some((last, middle)) => {
                        for point in middle {
                            editor.pointer_move(*point);
                        }
                        editor.pointer_up(*last);
                    }
                    None => editor.pointer_up(*first),
                }
            }
            Self::Zoom { delta } => editor.zoom_by(*delta),
            Self::Pan { dx, dy } => editor.pan_by(*dx, *dy),
            Self::Viewport { width, height } => editor.set_viewport(Viewport::new(*width, *height)),
            Self::Undo => {
                if !editor.undo_last_stroke() {
                    log::debug!("undo with no strokes");
                }
            }
            Self::Clear => editor.clear(),
        }
    }
}
