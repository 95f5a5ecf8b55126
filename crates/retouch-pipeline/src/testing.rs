//! Scripted gateway for unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use crate::gateway::{GenerationFailure, GenerationGateway, GenerationRequest, GenerationResult};
use crate::types::RgbaImage;

/// One scripted gateway reply.
pub enum Reply {
    Image(RgbaImage),
    Fail(GenerationFailure),
    /// Reply with the image after sleeping on the tokio clock.
    Delayed(Duration, RgbaImage),
}

/// What the gateway was asked.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub instruction: String,
    pub had_mask: bool,
    pub attempt: u32,
}

/// Serves replies in order; an exhausted script is a transport error.
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedGateway {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl GenerationGateway for ScriptedGateway {
    fn generate(
        &self,
        request: GenerationRequest<'_>,
    ) -> impl Future<Output = GenerationResult> + Send {
        self.seen.lock().unwrap().push(SeenRequest {
            instruction: request.instruction.to_string(),
            had_mask: request.mask.is_some(),
            attempt: request.attempt,
        });
        let reply = self.replies.lock().unwrap().pop_front();
        async move {
            match reply {
                None => Err(GenerationFailure::transport("script exhausted")),
                Some(Reply::Image(image)) => Ok(image),
                Some(Reply::Fail(failure)) => Err(failure),
                Some(Reply::Delayed(delay, image)) => {
                    tokio::time::sleep(delay).await;
                    Ok(image)
                }
            }
        }
    }
}
