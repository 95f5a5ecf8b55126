//! The boundary to the external image-generation service.
//!
//! The pipeline never talks to a network itself. It hands a
//! [`GenerationRequest`] to a [`GenerationGateway`] implementation and
//! receives either a decoded image or a typed [`GenerationFailure`].
//! Gateways must not substitute the unmodified input for a failure; a
//! result that cannot be decoded is [`FailureKind::NoImagePayload`].
//!
//! The wire helpers in this module ([`encode_photo`], [`Mask::to_png`],
//! [`decode_payload`], [`WireRequest`], [`WireResponse`]) fix the
//! payload formats adapters use: photos travel as JPEG, masks as
//! 8-bit grayscale PNG.

use std::fmt;
use std::future::Future;

use image::ImageEncoder;
use image::buffer::ConvertBuffer;
use serde::{Deserialize, Serialize};

use crate::mask::Mask;
use crate::types::{RgbaImage, Zone};

/// Why a generation call produced no usable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The service refused the request on content-policy grounds.
    SafetyBlocked,
    /// The service answered without a decodable image.
    NoImagePayload,
    /// The call did not complete within its timeout.
    Timeout,
    /// The transport failed (connection, HTTP status, malformed body).
    TransportError,
    /// The request itself could not be built or was rejected as
    /// syntactically invalid. Sending it again cannot help.
    MalformedRequest,
}

impl FailureKind {
    /// Whether another attempt may succeed. Safety blocks and
    /// malformed requests are deterministic for a given input and are
    /// never retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::SafetyBlocked | Self::MalformedRequest)
    }

    /// Short name used in reports and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SafetyBlocked => "safety_blocked",
            Self::NoImagePayload => "no_image_payload",
            Self::Timeout => "timeout",
            Self::TransportError => "transport_error",
            Self::MalformedRequest => "malformed_request",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failed generation call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct GenerationFailure {
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable detail from the gateway.
    pub message: String,
}

impl GenerationFailure {
    /// Create a failure of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A content-policy refusal.
    pub fn safety_blocked(message: impl Into<String>) -> Self {
        Self::new(FailureKind::SafetyBlocked, message)
    }

    /// A response without a usable image.
    pub fn no_image_payload(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NoImagePayload, message)
    }

    /// A call that exceeded its time budget.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    /// A transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransportError, message)
    }

    /// A request the gateway could not build or the service rejected
    /// as invalid.
    pub fn malformed_request(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedRequest, message)
    }
}

/// Outcome of one generation call.
pub type GenerationResult = Result<RgbaImage, GenerationFailure>;

/// One generation call: the image to edit, what to do to it, and
/// optionally which pixels may change.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// The current working image. Gateways must not mutate it.
    pub image: &'a RgbaImage,
    /// Full instruction text, including any emphasis for retries.
    pub instruction: &'a str,
    /// Zone mask (white editable, black protected), if the strategy
    /// sends one.
    pub mask: Option<&'a Mask>,
    /// 1-based attempt number within the current phase.
    pub attempt: u32,
}

/// Contract for the external generation service.
///
/// Implementations own transport, authentication, and response
/// parsing. The orchestrator enforces its own per-call timeout on top
/// of whatever the transport does, and races each call against
/// session reset.
pub trait GenerationGateway {
    /// Run one generation call.
    fn generate(
        &self,
        request: GenerationRequest<'_>,
    ) -> impl Future<Output = GenerationResult> + Send;
}

/// Whether zone edits send the zone mask to the service.
///
/// Either way the result is composited locally through the zone mask,
/// so pixels outside the zone never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationStrategy {
    /// Send the zone mask with each zone request.
    #[default]
    MaskGuided,
    /// Send only the image and instruction; rely on local compositing.
    TextOnly,
}

impl GenerationStrategy {
    /// The mask to attach to a zone request under this strategy.
    #[must_use]
    pub fn request_mask(self, zone: &Zone) -> Option<&Mask> {
        match self {
            Self::MaskGuided => Some(zone.mask.as_ref()),
            Self::TextOnly => None,
        }
    }
}

impl fmt::Display for GenerationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaskGuided => f.write_str("mask-guided"),
            Self::TextOnly => f.write_str("text-only"),
        }
    }
}

/// An encoded image payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    /// MIME type of `data`.
    pub mime_type: String,
    /// Encoded bytes.
    pub data: Vec<u8>,
}

/// Encode a photo for the wire as JPEG at `quality` (1–100).
///
/// Alpha is dropped; JPEG has no alpha channel.
///
/// # Errors
///
/// Returns the encoder error if JPEG encoding fails.
pub fn encode_photo(image: &RgbaImage, quality: u8) -> Result<EncodedImage, image::ImageError> {
    let rgb: image::RgbImage = image.convert();
    let mut data = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut data, quality);
    encoder.write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(EncodedImage {
        mime_type: "image/jpeg".to_string(),
        data,
    })
}

/// Encode a mask for the wire as lossless grayscale PNG.
///
/// # Errors
///
/// Returns the encoder error if PNG encoding fails.
pub fn encode_mask(mask: &Mask) -> Result<EncodedImage, image::ImageError> {
    Ok(EncodedImage {
        mime_type: "image/png".to_string(),
        data: mask.to_png()?,
    })
}

/// Decode a response payload into an image.
///
/// # Errors
///
/// Empty or undecodable bytes are [`FailureKind::NoImagePayload`].
pub fn decode_payload(bytes: &[u8]) -> GenerationResult {
    if bytes.is_empty() {
        return Err(GenerationFailure::no_image_payload("response carried no image"));
    }
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| GenerationFailure::no_image_payload(format!("undecodable image: {e}")))
}

/// A request as it crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    /// Instruction text.
    pub instruction: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// JPEG-encoded input image.
    pub image: EncodedImage,
    /// PNG-encoded mask, when one is sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<EncodedImage>,
}

impl WireRequest {
    /// Encode a request for transport.
    ///
    /// # Errors
    ///
    /// Returns the encoder error if the image or mask cannot be encoded.
    pub fn encode(request: &GenerationRequest<'_>, jpeg_quality: u8) -> Result<Self, image::ImageError> {
        Ok(Self {
            instruction: request.instruction.to_string(),
            attempt: request.attempt,
            image: encode_photo(request.image, jpeg_quality)?,
            mask: request.mask.map(encode_mask).transpose()?,
        })
    }
}

/// A response as it crosses the wire: an image or a typed failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireResponse {
    /// The service returned an image.
    Image(EncodedImage),
    /// The service reported a failure.
    Failure(GenerationFailure),
}

impl WireResponse {
    /// Decode into a [`GenerationResult`].
    ///
    /// # Errors
    ///
    /// Returns the carried failure, or [`FailureKind::NoImagePayload`]
    /// if the image bytes do not decode.
    pub fn into_result(self) -> GenerationResult {
        match self {
            Self::Image(encoded) => decode_payload(&encoded.data),
            Self::Failure(failure) => Err(failure),
        }
    }
}
