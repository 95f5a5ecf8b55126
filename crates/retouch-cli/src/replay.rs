//! A [`GenerationGateway`] that serves recorded responses from disk.
//!
//! Call `n` (1-based, across the whole run including refinements) is
//! answered from `NNN.png`, `NNN.jpg`, or `NNN.jpeg` as an image, or
//! from `NNN.json` holding a [`WireResponse`]. With no file for the
//! call the answer is [`FailureKind::NoImagePayload`](retouch_pipeline::FailureKind).
//! A request that cannot be encoded for the wire is answered with
//! `MalformedRequest` without consuming a response file.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use retouch_pipeline::gateway::{WireRequest, WireResponse, decode_payload};
use retouch_pipeline::{GenerationFailure, GenerationGateway, GenerationRequest, GenerationResult};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Replays a directory of recorded responses in call order.
#[derive(Debug)]
pub struct ReplayGateway {
    responses: PathBuf,
    requests: Option<PathBuf>,
    jpeg_quality: u8,
    calls: AtomicUsize,
}

impl ReplayGateway {
    /// Serve responses from `responses`. When `requests` is set, every
    /// request is written there as `NNN.json` before it is answered.
    pub const fn new(responses: PathBuf, requests: Option<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            responses,
            requests,
            jpeg_quality,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of calls answered so far.
    #[cfg(test)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl GenerationGateway for ReplayGateway {
    fn generate(&self, request: GenerationRequest<'_>) -> impl Future<Output = GenerationResult> + Send {
        // An unencodable request does not consume a response.
        let call = WireRequest::encode(&request, self.jpeg_quality)
            .map(|wire| {
                let index = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
                let record = self
                    .requests
                    .as_ref()
                    .map(|dir| dir.join(format!("{index:03}.json")));
                (index, wire, record)
            })
            .map_err(|e| GenerationFailure::malformed_request(format!("cannot encode request: {e}")));
        let responses = self.responses.clone();
        async move {
            let (index, wire, record) = call?;
            if let Some(path) = record {
                write_request(&path, &wire).await;
            }
            load_response(&responses, index).await
        }
    }
}

/// Recording is best effort; a failure is logged and the call proceeds.
async fn write_request(path: &Path, wire: &WireRequest) {
    let result = match serde_json::to_vec_pretty(wire) {
        Ok(bytes) => tokio::fs::write(path, bytes).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = result {
        log::warn!("could not record request {}: {e}", path.display());
    }
}

async fn load_response(dir: &Path, index: usize) -> GenerationResult {
    for ext in IMAGE_EXTENSIONS {
        let path = dir.join(format!("{index:03}.{ext}"));
        if let Some(bytes) = read_optional(&path).await? {
            log::debug!("call {index}: image from {}", path.display());
            return decode_payload(&bytes);
        }
    }

    let path = dir.join(format!("{index:03}.json"));
    let Some(bytes) = read_optional(&path).await? else {
        return Err(GenerationFailure::no_image_payload(format!(
            "no recorded response for call {index}"
        )));
    };
    let response: WireResponse = serde_json::from_slice(&bytes).map_err(|e| {
        GenerationFailure::transport(format!("malformed response {}: {e}", path.display()))
    })?;
    response.into_result()
}

/// Read a file, treating absence as `None`. Any other I/O error is a
/// transport failure.
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, GenerationFailure> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GenerationFailure::transport(format!("{}: {e}", path.display()))),
    }
}
