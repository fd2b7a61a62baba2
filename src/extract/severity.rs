use regex::Regex;
use std::sync::OnceLock;

/// Lowest and highest severity a patient can report
pub const SEVERITY_MIN: u8 = 1;
pub const SEVERITY_MAX: u8 = 10;

/// Severity assumed before the patient answers
pub const DEFAULT_SEVERITY: u8 = 5;

const SPELLED: [(&str, u8); 10] = [
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
];

struct Patterns {
    bands: Vec<(Regex, u8)>,
    fraction: Regex,
    out_of: Regex,
    digit: Regex,
    spelled: Vec<(Regex, u8)>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        bands: vec![
            (Regex::new(r"\bmild\b").expect("valid regex"), 2),
            (Regex::new(r"\bmoderate\b").expect("valid regex"), 5),
            (Regex::new(r"\bsevere\b").expect("valid regex"), 8),
            (Regex::new(r"\bwors[te]\b").expect("valid regex"), 10),
        ],
        fraction: Regex::new(r"\b(10|[1-9])\s*/\s*10\b").expect("valid regex"),
        out_of: Regex::new(r"\b(10|[1-9])\s*(?:out\s+of|over)\s*10\b").expect("valid regex"),
        digit: Regex::new(r"\b(10|[1-9])\b").expect("valid regex"),
        spelled: SPELLED
            .iter()
            .map(|(word, value)| {
                let re = Regex::new(&format!(r"\b{}\b", word)).expect("valid regex");
                (re, *value)
            })
            .collect(),
    })
}

/// Clamp any numeric severity into [1, 10]
pub fn clamp_severity(value: i64) -> u8 {
    value.clamp(SEVERITY_MIN as i64, SEVERITY_MAX as i64) as u8
}

/// Parse a spoken severity answer.
///
/// Precedence, first match wins:
/// 1. band words: mild → 2, moderate → 5, severe → 8, worst/worse → 10
/// 2. `N/10`
/// 3. `N out of 10` / `N over 10`
/// 4. a bare number 1–10
/// 5. a spelled-out number one..ten
///
/// Returns `None` when nothing matches; callers keep their previous value.
pub fn parse_severity(text: &str) -> Option<u8> {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }

    let p = patterns();

    if let Some((_, value)) = p.bands.iter().find(|(re, _)| re.is_match(&text)) {
        return Some(*value);
    }

    for re in [&p.fraction, &p.out_of, &p.digit] {
        if let Some(n) = re
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok())
        {
            return Some(clamp_severity(n));
        }
    }

    p.spelled
        .iter()
        .find(|(re, _)| re.is_match(&text))
        .map(|(_, value)| clamp_severity(*value as i64))
}

/// Apply a severity answer to an existing value, keeping it when nothing parses
pub fn update_severity(previous: u8, text: &str) -> u8 {
    match parse_severity(text) {
        Some(value) => value,
        None => clamp_severity(previous as i64),
    }
}
