//! Structured symptom extraction from free-form speech
//!
//! - `severity`: spoken severity → integer in [1, 10]
//! - `classify`: keyword classification into physical / mental / emotional
//! - `slots`: the sequential slot-filling state machine

pub mod classify;
pub mod severity;
pub mod slots;

pub use classify::{classify_symptom, SymptomType};
pub use severity::{parse_severity, update_severity, DEFAULT_SEVERITY};
pub use slots::{Slot, SlotExtractor, SlotSnapshot, DEFAULT_LAYOUT};
