pub mod context;
pub mod log;
pub mod messages;
pub mod stream;

pub use context::{fetch_patient_context, priming_text, PrimingConfig};
pub use log::{ConversationMessage, Direction, EventLog, RawEvent, Role, TranscriptEvent, CONTEXT_MARKER};
pub use messages::{ClientEvent, ConversationItem, ServerEvent};
pub use stream::{Dispatch, EventStream, SendOutcome};
