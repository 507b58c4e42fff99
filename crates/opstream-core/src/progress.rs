use crate::Progress;
use regex::Regex;
use std::sync::OnceLock;

pub const LINE_BREAK_MARKER: &str = "<br>";

fn progress_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"^\[([#+.]*)\] > ").expect("valid regex"))
}

/// Splits a leading `[##+..] > ` progress marker off a message.
///
/// `#` counts completed steps, `+` partial ones and `.` pending ones. Text
/// without the marker comes back unchanged with no progress.
pub fn parse_progress(text: &str) -> (Option<Progress>, &str) {
    let Some(captures) = progress_marker().captures(text) else {
        return (None, text);
    };
    let (Some(whole), Some(bar)) = (captures.get(0), captures.get(1)) else {
        return (None, text);
    };
    let mut progress = Progress::default();
    for ch in bar.as_str().chars() {
        match ch {
            '#' => progress.completed += 1,
            '+' => progress.partial += 1,
            '.' => progress.pending += 1,
            _ => {}
        }
    }
    (Some(progress), &text[whole.end()..])
}

pub fn normalize_line_breaks(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', LINE_BREAK_MARKER)
}
