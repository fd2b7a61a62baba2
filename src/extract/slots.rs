use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classify::{classify_symptom, SymptomType};
use super::severity::{update_severity, DEFAULT_SEVERITY};

/// A structured field filled from one conversational turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// Asked directly: "is this physical, mental or emotional?"
    SymptomType,
    SymptomName,
    Severity,
    Description,
    Notes,
}

/// Name → severity → description → notes
pub const DEFAULT_LAYOUT: [Slot; 4] = [
    Slot::SymptomName,
    Slot::Severity,
    Slot::Description,
    Slot::Notes,
];

/// Immutable view of the extraction state after a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub symptom_type: SymptomType,
    pub symptom_name: String,
    /// Always within [1, 10]
    pub severity: u8,
    pub description: String,
    pub notes: String,
    /// Index of the slot the next utterance fills. Never decreases.
    pub current_step: usize,
    /// Utterances accepted so far
    pub turns: usize,
    /// Every slot has received an answer at least once
    pub complete: bool,
}

impl Default for SlotSnapshot {
    fn default() -> Self {
        Self {
            symptom_type: SymptomType::Unset,
            symptom_name: String::new(),
            severity: DEFAULT_SEVERITY,
            description: String::new(),
            notes: String::new(),
            current_step: 0,
            turns: 0,
            complete: false,
        }
    }
}

type Subscriber = Box<dyn FnMut(&SlotSnapshot) + Send>;

/// Sequential slot-filling state machine.
///
/// Each completed transcription fills the slot under the cursor and moves
/// the cursor one step forward, stopping at the last slot. Further turns
/// keep refining the last slot.
pub struct SlotExtractor {
    layout: Vec<Slot>,
    state: SlotSnapshot,
    type_answered: bool,
    subscriber: Option<Subscriber>,
}

impl SlotExtractor {
    /// Create an extractor over a custom slot order. An empty layout falls back to the default.
    pub fn new(layout: Vec<Slot>) -> Self {
        let layout = if layout.is_empty() {
            DEFAULT_LAYOUT.to_vec()
        } else {
            layout
        };

        Self {
            layout,
            state: SlotSnapshot::default(),
            type_answered: false,
            subscriber: None,
        }
    }

    /// Register the callback that receives a snapshot after every turn
    pub fn subscribe(&mut self, subscriber: impl FnMut(&SlotSnapshot) + Send + 'static) {
        self.subscriber = Some(Box::new(subscriber));
    }

    pub fn layout(&self) -> &[Slot] {
        &self.layout
    }

    pub fn snapshot(&self) -> &SlotSnapshot {
        &self.state
    }

    /// Slot the next utterance will fill
    pub fn current_slot(&self) -> Slot {
        self.layout[self.state.current_step]
    }

    /// Clear all slots for a new session
    pub fn reset(&mut self) {
        self.state = SlotSnapshot::default();
        self.type_answered = false;
    }

    /// Apply one completed transcription and publish the resulting snapshot.
    ///
    /// Blank utterances leave the cursor and slots untouched; the snapshot is
    /// still published so subscribers stay in step with `current_step`.
    pub fn on_transcription(&mut self, transcript: &str) -> SlotSnapshot {
        let text = transcript.trim();

        if !text.is_empty() {
            let slot = self.current_slot();
            self.apply(slot, text);

            self.state.turns += 1;
            let last = self.layout.len() - 1;
            if self.state.current_step == last {
                self.state.complete = true;
            }
            self.state.current_step = (self.state.current_step + 1).min(last);

            debug!(
                "Filled {:?}, cursor now {}/{}",
                slot,
                self.state.current_step,
                self.layout.len() - 1
            );
        }

        let snapshot = self.state.clone();
        if let Some(subscriber) = self.subscriber.as_mut() {
            subscriber(&snapshot);
        }
        snapshot
    }

    fn apply(&mut self, slot: Slot, text: &str) {
        match slot {
            Slot::SymptomType => {
                self.state.symptom_type = classify_symptom(text);
                self.type_answered = true;
            }
            Slot::SymptomName => {
                self.state.symptom_name = text.to_string();
                if !self.type_answered {
                    self.state.symptom_type = classify_symptom(text);
                }
            }
            Slot::Severity => {
                self.state.severity = update_severity(self.state.severity, text);
            }
            Slot::Description => {
                self.state.description = text.to_string();
                if !self.type_answered {
                    let combined = format!("{} {}", self.state.symptom_name, text);
                    self.state.symptom_type = classify_symptom(&combined);
                }
            }
            Slot::Notes => {
                self.state.notes = text.to_string();
            }
        }
    }
}

impl Default for SlotExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_LAYOUT.to_vec())
    }
}

impl std::fmt::Debug for SlotExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotExtractor")
            .field("layout", &self.layout)
            .field("state", &self.state)
            .field("type_answered", &self.type_answered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_four_slot_scenario() {
        let mut extractor = SlotExtractor::default();
        for said in [
            "I have a headache",
            "it's an 8",
            "started this morning, throbbing pain",
            "nothing else",
        ] {
            extractor.on_transcription(said);
        }

        let snap = extractor.snapshot();
        assert_eq!(snap.symptom_type, SymptomType::Physical);
        assert_eq!(snap.symptom_name, "I have a headache");
        assert_eq!(snap.severity, 8);
        assert_eq!(snap.description, "started this morning, throbbing pain");
        assert_eq!(snap.notes, "nothing else");
        assert_eq!(snap.current_step, 3);
        assert!(snap.complete);
    }

    #[test]
    fn test_cursor_clamps_at_last_slot() {
        let mut extractor = SlotExtractor::default();
        let mut steps = Vec::new();
        for said in ["a", "b", "c", "d", "e", "f"] {
            steps.push(extractor.on_transcription(said).current_step);
        }
        assert_eq!(steps, vec![1, 2, 3, 3, 3, 3]);
        assert_eq!(extractor.snapshot().notes, "f");
    }

    #[test]
    fn test_blank_utterance_does_not_advance() {
        let mut extractor = SlotExtractor::default();
        let snap = extractor.on_transcription("   ");
        assert_eq!(snap.current_step, 0);
        assert_eq!(snap.turns, 0);
        assert!(snap.symptom_name.is_empty());
    }

    #[test]
    fn test_unparseable_severity_keeps_default() {
        let mut extractor = SlotExtractor::default();
        extractor.on_transcription("back pain");
        let snap = extractor.on_transcription("hard to say");
        assert_eq!(snap.severity, DEFAULT_SEVERITY);
        assert_eq!(snap.current_step, 2);
    }

    #[test]
    fn test_inferred_type_is_overwritten_by_description() {
        let mut extractor = SlotExtractor::default();
        extractor.on_transcription("trouble lately");
        assert_eq!(extractor.snapshot().symptom_type, SymptomType::Physical);
        extractor.on_transcription("moderate");
        extractor.on_transcription("constant anxiety and panic");
        assert_eq!(extractor.snapshot().symptom_type, SymptomType::Emotional);
    }

    #[test]
    fn test_asked_type_is_not_overwritten() {
        let mut extractor = SlotExtractor::new(vec![
            Slot::SymptomType,
            Slot::SymptomName,
            Slot::Severity,
            Slot::Description,
            Slot::Notes,
        ]);
        extractor.on_transcription("mental, I think");
        extractor.on_transcription("can't focus");
        extractor.on_transcription("mild");
        extractor.on_transcription("my stomach hurts too, lots of pain");
        let snap = extractor.snapshot();
        assert_eq!(snap.symptom_type, SymptomType::Mental);
        assert_eq!(snap.severity, 2);
    }

    #[test]
    fn test_subscriber_receives_every_turn() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut extractor = SlotExtractor::default();
        extractor.subscribe(move |snap| sink.lock().unwrap().push(snap.current_step));

        extractor.on_transcription("cough");
        extractor.on_transcription("");
        extractor.on_transcription("seven");

        assert_eq!(*seen.lock().unwrap(), vec![1, 1, 2]);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut extractor = SlotExtractor::default();
        extractor.on_transcription("fever");
        extractor.on_transcription("9");
        extractor.reset();
        assert_eq!(*extractor.snapshot(), SlotSnapshot::default());
        assert_eq!(extractor.current_slot(), Slot::SymptomName);
    }

    #[test]
    fn test_empty_layout_uses_default() {
        let extractor = SlotExtractor::new(Vec::new());
        assert_eq!(extractor.layout(), &DEFAULT_LAYOUT);
    }
}
