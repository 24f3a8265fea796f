//! Streaming chat client core: answer-stream decoding, the conversation
//! transcript, and the session controller that ties them to a backend.

pub mod error;
pub mod format;
pub mod frame;
pub mod parser;
pub mod session;
pub mod surface;
pub mod transcript;
pub mod transport;

pub use error::{SessionError, TransportError};
pub use frame::FrameDecoder;
pub use parser::{parse_frame, StreamEvent};
pub use session::{
    SessionController, SessionOptions, SessionOutcome, SessionReport, SessionState, UploadOutcome,
};
pub use surface::{NullSurface, RenderSurface};
pub use transcript::{Content, Message, Transcript, TranscriptChange};
pub use transport::{AskTransport, ByteStream, HttpTransport, ImageUpload};
