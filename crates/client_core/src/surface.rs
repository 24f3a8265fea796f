//! Rendering seam between the session core and whatever presents it.

use crate::transcript::{Message, TranscriptChange};

/// Presentation calls issued by the session controller.
///
/// Calls arrive in the order the transcript changed; implementations must
/// not call back into the controller from inside them.
pub trait RenderSurface: Send + Sync {
    fn append_log_entry(&self, markup: &str);
    fn clear_log(&self);
    fn append_message(&self, message: &Message);
    fn replace_pending(&self, message: &Message);
    fn remove_pending(&self);
    fn set_loading(&self, loading: bool);
    fn set_log_panel_expanded(&self, expanded: bool);
}

/// Surface that renders nothing, for headless use.
pub struct NullSurface;

impl RenderSurface for NullSurface {
    fn append_log_entry(&self, _markup: &str) {}
    fn clear_log(&self) {}
    fn append_message(&self, _message: &Message) {}
    fn replace_pending(&self, _message: &Message) {}
    fn remove_pending(&self) {}
    fn set_loading(&self, _loading: bool) {}
    fn set_log_panel_expanded(&self, _expanded: bool) {}
}

pub fn render_changes(surface: &dyn RenderSurface, changes: &[TranscriptChange]) {
    for change in changes {
        match change {
            TranscriptChange::Appended(message) => surface.append_message(message),
            TranscriptChange::PendingReplaced(message) => surface.replace_pending(message),
            TranscriptChange::PendingRemoved(_) => surface.remove_pending(),
            TranscriptChange::LogAppended(markup) => surface.append_log_entry(markup),
            TranscriptChange::LogCleared => surface.clear_log(),
        }
    }
}
