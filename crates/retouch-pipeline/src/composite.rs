//! Mask compositing: merging zone masks and pasting zone results.
//!
//! Both operations threshold hard. A mask pixel at or above the
//! threshold is included, everything else is protected, and no gray
//! values survive into the composite or into a blended pixel. Mask
//! edges are not feathered ([`FEATHER_RADIUS`] is zero), so a zone
//! result replaces exactly the pixels the user painted.

use image::Luma;

use crate::mask::{BLACK, Mask, WHITE};
use crate::types::{CompositingError, Dimensions, RgbaImage};

/// Feathering applied to mask edges before blending, in pixels.
/// Compositing only supports hard edges; changing this fails the build.
pub const FEATHER_RADIUS: u32 = 0;

/// Merge zone masks into a single protection mask.
///
/// A pixel is white if any input mask reaches `threshold` there,
/// otherwise black. With no masks the result is all black.
///
/// # Errors
///
/// Returns [`CompositingError::MaskSize`] if any mask does not match
/// `dimensions`.
pub fn composite_masks<'a, I>(
    dimensions: Dimensions,
    masks: I,
    threshold: u8,
) -> Result<Mask, CompositingError>
where
    I: IntoIterator<Item = &'a Mask>,
{
    let mut out = Mask::blank(dimensions).into_image();
    for mask in masks {
        let mask_dims = mask.dimensions();
        if mask_dims != dimensions {
            return Err(CompositingError::MaskSize {
                working: dimensions,
                mask: mask_dims,
            });
        }
        for (dst, src) in out.pixels_mut().zip(mask.as_image().pixels()) {
            if src.0[0] >= threshold {
                *dst = Luma([WHITE]);
            }
        }
    }
    Ok(Mask::new(out))
}

/// Paste a zone's edited image into the working image.
///
/// Each output pixel is taken from `edited` where `mask` is included
/// and from `working` everywhere else. `working` itself is never
/// modified; on error nothing is written anywhere.
///
/// # Errors
///
/// Returns [`CompositingError::ImageSize`] if `edited` and `working`
/// differ in size, or [`CompositingError::MaskSize`] if `mask` does.
pub fn apply_zone(
    working: &RgbaImage,
    edited: &RgbaImage,
    mask: &Mask,
    threshold: u8,
) -> Result<RgbaImage, CompositingError> {
    let working_dims = Dimensions::of(working);
    let edited_dims = Dimensions::of(edited);
    if edited_dims != working_dims {
        return Err(CompositingError::ImageSize {
            working: working_dims,
            edited: edited_dims,
        });
    }
    let mask_dims = mask.dimensions();
    if mask_dims != working_dims {
        return Err(CompositingError::MaskSize {
            working: working_dims,
            mask: mask_dims,
        });
    }

    const { assert!(FEATHER_RADIUS == 0, "feathered compositing is not implemented") };
    let mut out = working.clone();
    for ((dst, src), m) in out
        .pixels_mut()
        .zip(edited.pixels())
        .zip(mask.as_image().pixels())
    {
        if m.0[0] >= threshold {
            *dst = *src;
        }
    }
    Ok(out)
}

/// Binarize a single mask against `threshold`.
#[must_use]
pub fn binarize(mask: &Mask, threshold: u8) -> Mask {
    let mut out = mask.as_image().clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] >= threshold { WHITE } else { BLACK };
    }
    Mask::new(out)
}
