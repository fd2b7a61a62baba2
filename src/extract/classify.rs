use serde::{Deserialize, Serialize};

/// Broad symptom category recorded with every symptom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SymptomType {
    Physical,
    Mental,
    Emotional,
    #[default]
    Unset,
}

impl SymptomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymptomType::Physical => "physical",
            SymptomType::Mental => "mental",
            SymptomType::Emotional => "emotional",
            SymptomType::Unset => "unset",
        }
    }
}

impl std::fmt::Display for SymptomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Matched as word prefixes, so "depress" covers "depressed" and "depression".
const PHYSICAL: &[&str] = &[
    "physical", "pain", "ache", "aching", "fever", "cough", "nausea", "nauseous", "headache", "migraine",
    "dizz", "vomit", "cramp", "rash", "itch", "sore", "swell", "swollen", "bleed", "chills",
    "fatigue", "tired", "breath", "chest", "stomach", "throat", "back", "joint", "muscle",
    "diarrh", "constipat", "burn", "numb", "throbbing",
];

const MENTAL: &[&str] = &[
    "mental", "focus", "memory", "insomnia", "concentrat", "confus", "forget", "fog", "sleep",
    "attention", "distract", "thinking", "thoughts", "hallucinat",
];

const EMOTIONAL: &[&str] = &[
    "emotion", "anxi", "depress", "mood", "stress", "panic", "sad", "irritab", "lonely", "fear",
    "afraid", "overwhelm", "cry", "crying", "anger", "angry", "worr", "hopeless", "grief",
];

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn score(words: &[String], keywords: &[&str]) -> usize {
    words
        .iter()
        .filter(|w| keywords.iter().any(|k| w.starts_with(k)))
        .count()
}

/// Classify free text into a symptom category.
///
/// The category with the most keyword hits wins; ties resolve in the order
/// physical, mental, emotional. Text with no hits is physical, since a
/// classification is always required.
pub fn classify_symptom(text: &str) -> SymptomType {
    let words = words(text);
    let scores = [
        (SymptomType::Physical, score(&words, PHYSICAL)),
        (SymptomType::Mental, score(&words, MENTAL)),
        (SymptomType::Emotional, score(&words, EMOTIONAL)),
    ];

    let mut best = (SymptomType::Physical, 0);
    for (kind, hits) in scores {
        if hits > best.1 {
            best = (kind, hits);
        }
    }
    best.0
}
