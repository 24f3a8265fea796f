//! One question/answer cycle: submission, stream consumption and the
//! loading / log panel flags derived from it.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::StreamExt;
use shared::{
    domain::{is_supported_image_path, Role, SearchBudget},
    protocol::{AskRequest, UploadImageResponse},
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{SessionError, TransportError},
    format::format_inline,
    frame::FrameDecoder,
    parser::{parse_frame, StreamEvent},
    surface::{render_changes, RenderSurface},
    transcript::{Content, Message, Transcript, TranscriptChange},
    transport::{AskTransport, ByteStream, ImageUpload},
};

pub const UPLOAD_PLACEHOLDER: &str = "Uploading and processing image, please wait...";
const UNSUPPORTED_IMAGE_MESSAGE: &str =
    "Unsupported file type. Please upload PNG, JPG, JPEG, GIF, BMP, or TIFF files.";
const SEGMENTATION_HINT: &str =
    "Suggestion: upload a clear PNG, JPG, JPEG, GIF, BMP or TIFF image.";
const UPLOAD_HINT: &str = "Suggestion: check the network connection and choose the image again.";

/// Backend tuning passed through verbatim with each question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub enable_multi_hop: bool,
    pub search_budget: SearchBudget,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            enable_multi_hop: true,
            search_budget: SearchBudget::Deeper,
        }
    }
}

/// Flags for the question currently being answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub active: bool,
    pub log_panel_expanded: bool,
    pub multi_hop_enabled: bool,
    pub search_budget: SearchBudget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// `finished` arrived after at least one answer.
    Answered,
    /// `finished` arrived without any answer.
    NoAnswer,
    BackendError(String),
    TransportFailed(String),
    /// The stream ended without a terminal event.
    Truncated,
}

/// Result of a completed session, with the final (inactive) state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed,
    Failed(String),
    /// The file type is not accepted; nothing was sent.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Busy {
    Question(SessionState),
    Upload,
}

struct ControllerState {
    transcript: Transcript,
    busy: Option<Busy>,
}

/// Drives the transcript from user submissions and backend responses.
///
/// At most one question or upload runs at a time; a submission while one is
/// in flight is rejected with [`SessionError::SessionActive`].
pub struct SessionController {
    transport: Arc<dyn AskTransport>,
    surface: Arc<dyn RenderSurface>,
    inner: Mutex<ControllerState>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn AskTransport>, surface: Arc<dyn RenderSurface>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            surface,
            inner: Mutex::new(ControllerState {
                transcript: Transcript::new(),
                busy: None,
            }),
        })
    }

    pub fn is_active(&self) -> bool {
        self.state().busy.is_some()
    }

    /// State of the question in flight, if any.
    pub fn session_state(&self) -> Option<SessionState> {
        match self.state().busy {
            Some(Busy::Question(state)) => Some(state),
            _ => None,
        }
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.state().transcript.messages().to_vec()
    }

    pub fn log_entries(&self) -> Vec<String> {
        self.state().transcript.log().to_vec()
    }

    /// Submits a question and consumes its answer stream to the end.
    pub async fn submit(
        &self,
        question: &str,
        options: SessionOptions,
    ) -> Result<SessionReport, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        let session = SessionState {
            active: true,
            log_panel_expanded: true,
            multi_hop_enabled: options.enable_multi_hop,
            search_budget: options.search_budget,
        };
        let guard = self.begin(Busy::Question(session), |transcript| {
            let mut changes = transcript.clear_log();
            changes.extend(transcript.submit_question(question));
            changes
        })?;
        self.surface.set_log_panel_expanded(true);
        self.surface.set_loading(true);

        let request = AskRequest {
            question: question.to_string(),
            enable_multi_hop: options.enable_multi_hop,
            search_budget: options.search_budget,
        };
        info!(
            multi_hop = request.enable_multi_hop,
            search_budget = %request.search_budget,
            "submitting question"
        );

        let outcome = match self.transport.ask(&request).await {
            Ok(stream) => self.consume(stream).await,
            Err(err) => self.fail_transport(&err),
        };
        info!(?outcome, "session ended");

        let state = guard.finish().unwrap_or(SessionState {
            active: false,
            log_panel_expanded: false,
            ..session
        });
        Ok(SessionReport { outcome, state })
    }

    /// Uploads an image for segmentation and records the result in the transcript.
    pub async fn upload_image(&self, path: &Path) -> Result<UploadOutcome, SessionError> {
        if !is_supported_image_path(path) {
            if self.is_active() {
                return Err(SessionError::SessionActive);
            }
            warn!(path = %path.display(), "rejecting unsupported image type");
            self.mutate(|transcript| {
                transcript.append(Role::Error, Content::Text(UNSUPPORTED_IMAGE_MESSAGE.into()))
            });
            return Ok(UploadOutcome::Rejected);
        }

        let guard = self.begin(Busy::Upload, |transcript| {
            transcript.begin_pending(UPLOAD_PLACEHOLDER)
        })?;

        let result = match ImageUpload::from_path(path).await {
            Ok(upload) => self.transport.upload_image(upload).await,
            Err(err) => Err(err),
        };

        let outcome = match result {
            Ok(response) if response.success => {
                self.mutate(|transcript| record_segmentation(transcript, &response));
                UploadOutcome::Completed
            }
            Ok(response) => {
                let reason = response
                    .error
                    .unwrap_or_else(|| "Unknown error".to_string());
                warn!(%reason, "image segmentation failed");
                let text = format!("Image segmentation failed: {reason}\n{SEGMENTATION_HINT}");
                self.mutate(|transcript| transcript.push_error(&text));
                UploadOutcome::Failed(reason)
            }
            Err(err) => {
                error!(error = %err, "image upload failed");
                let text = format!("Image upload failed: {err}\n{UPLOAD_HINT}");
                self.mutate(|transcript| transcript.push_error(&text));
                UploadOutcome::Failed(err.to_string())
            }
        };

        guard.finish();
        Ok(outcome)
    }

    /// Pulls chunks until a terminal event, a read failure, or stream end.
    async fn consume(&self, mut stream: ByteStream) -> SessionOutcome {
        let mut decoder = FrameDecoder::new();
        let mut answered = false;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => return self.fail_transport(&err),
            };

            for frame in decoder.push(&chunk) {
                let Some(event) = parse_frame(&frame) else {
                    continue;
                };
                answered |= matches!(event, StreamEvent::Answer(_));
                let outcome = event.is_terminal().then(|| match &event {
                    StreamEvent::Error(text) => SessionOutcome::BackendError(text.clone()),
                    _ if answered => SessionOutcome::Answered,
                    _ => SessionOutcome::NoAnswer,
                });
                debug!(?event, "applying stream event");
                self.mutate(|transcript| transcript.apply(event));
                if let Some(outcome) = outcome {
                    return outcome;
                }
            }
        }

        let discarded_bytes = decoder.finish();
        warn!(
            discarded_bytes,
            answered, "answer stream ended without a finished event"
        );
        self.mutate(|transcript| transcript.apply(StreamEvent::Finished));
        SessionOutcome::Truncated
    }

    fn fail_transport(&self, err: &TransportError) -> SessionOutcome {
        error!(error = %err, "question transport failed");
        let text = err.to_string();
        self.mutate(|transcript| transcript.push_error(&text));
        SessionOutcome::TransportFailed(text)
    }

    /// Claims the single session slot and applies the opening transcript changes.
    fn begin(
        &self,
        busy: Busy,
        open: impl FnOnce(&mut Transcript) -> Vec<TranscriptChange>,
    ) -> Result<SessionGuard<'_>, SessionError> {
        let changes = {
            let mut state = self.state();
            if state.busy.is_some() {
                warn!("rejecting submission while another one is active");
                return Err(SessionError::SessionActive);
            }
            state.busy = Some(busy);
            open(&mut state.transcript)
        };
        render_changes(self.surface.as_ref(), &changes);
        Ok(SessionGuard {
            controller: self,
            finished: false,
        })
    }

    /// Applies a transcript mutation, then mirrors it on the surface outside the lock.
    fn mutate(&self, apply: impl FnOnce(&mut Transcript) -> Vec<TranscriptChange>) {
        let changes = apply(&mut self.state().transcript);
        render_changes(self.surface.as_ref(), &changes);
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases the session slot. Returns the final question state, if the
    /// slot held a question.
    fn release(&self, cancelled: bool) -> Option<SessionState> {
        let (busy, changes) = {
            let mut state = self.state();
            let busy = state.busy.take();
            let changes = if cancelled {
                state.transcript.remove_pending()
            } else {
                Vec::new()
            };
            (busy, changes)
        };
        render_changes(self.surface.as_ref(), &changes);

        match busy {
            Some(Busy::Question(mut session)) => {
                session.active = false;
                session.log_panel_expanded = false;
                self.surface.set_loading(false);
                self.surface.set_log_panel_expanded(false);
                Some(session)
            }
            Some(Busy::Upload) | None => None,
        }
    }
}

/// Holds the session slot; releasing it exactly once, including when the
/// owning future is dropped mid-stream.
struct SessionGuard<'a> {
    controller: &'a SessionController,
    finished: bool,
}

impl SessionGuard<'_> {
    fn finish(mut self) -> Option<SessionState> {
        self.finished = true;
        self.controller.release(false)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("session cancelled before completion");
            self.controller.release(true);
        }
    }
}

fn record_segmentation(
    transcript: &mut Transcript,
    response: &UploadImageResponse,
) -> Vec<TranscriptChange> {
    let mut changes = transcript.remove_pending();
    if let Some(original) = &response.original_image {
        changes.extend(transcript.append(
            Role::User,
            Content::Markup(format!(
                "<div class=\"user-image-upload\"><p>Uploaded image:</p><img src=\"{original}\" alt=\"uploaded image\"></div>"
            )),
        ));
    }
    if let Some(segmented) = &response.segmented_image {
        changes.extend(transcript.append(
            Role::Assistant,
            Content::Markup(format!(
                "<div class=\"segmentation-result\"><p>Segmentation result:</p><img src=\"{segmented}\" alt=\"segmentation result\"></div>"
            )),
        ));
    }
    if let Some(description) = response.description.as_deref().filter(|d| !d.is_empty()) {
        changes.extend(transcript.append(
            Role::Assistant,
            Content::Markup(format_inline(description)),
        ));
    }
    changes
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
