//! Pane-buffer classification.
//!
//! A captured pane buffer is classified as `working`, `ready` or `unknown`
//! from textual indicators alone. The indicator set is a fixed internal
//! constant, pinned by the tests below; it is deliberately not
//! user-configurable because a false `ready` feeds the circuit breaker.

use std::sync::OnceLock;

use regex::Regex;

use crate::agent::PaneState;

/// Spinner glyphs the agent UIs draw at the start of an active status line
/// (e.g. `✻ Thinking… (esc to interrupt)`).
const SPINNER_CHARS: &[char] = &['✢', '✽', '✶', '✻', '✳', '·'];

/// Interrupt hint shown while a turn is in flight.
const INTERRUPT_HINT: &str = "esc to interrupt";

/// Status-bar suffix for a command the agent is currently running.
const RUNNING_MARKER: &str = "(running)";

/// Prompt glyphs that lead the final line of an idle input box.
const PROMPT_GLYPHS: &[char] = &['│', '╰', '❯', '>'];

/// Trailing non-empty lines scanned for working indicators.
const TAIL_WINDOW: usize = 30;

/// Token-count hint (e.g. `1.2k tokens`, `523 tokens`) shown during
/// generation.
fn token_hint() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d[\d,.]*k?\s*tokens\b").expect("token hint regex"))
}

/// Classify a captured pane buffer.
///
/// Working indicators anywhere in the tail window win over a trailing
/// prompt glyph, so a partially repainted prompt never reads as idle.
pub fn detect(buf: &str) -> PaneState {
    let lines: Vec<&str> = buf.lines().collect();

    let working = lines
        .iter()
        .rev()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .take(TAIL_WINDOW)
        .any(is_working_line);
    if working {
        return PaneState::Working;
    }

    let last_non_empty = lines
        .iter()
        .rev()
        .map(|line| line.trim())
        .find(|line| !line.is_empty());
    match last_non_empty {
        Some(line) if line.starts_with(PROMPT_GLYPHS) => PaneState::Ready,
        _ => PaneState::Unknown,
    }
}

fn is_working_line(line: &str) -> bool {
    if let Some(first) = line.chars().next()
        && SPINNER_CHARS.contains(&first)
        && (line.contains('…') || line.contains(INTERRUPT_HINT))
    {
        return true;
    }
    if line.contains(INTERRUPT_HINT) {
        return true;
    }
    if line.ends_with(RUNNING_MARKER) {
        return true;
    }
    token_hint().is_match(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE_PANE: &str = "\
Some earlier output

╭──────────────────────────────────────╮
│ >                                    │
╰──────────────────────────────────────╯
";

    #[test]
    fn spinner_line_is_working() {
        assert_eq!(detect("✻ Thinking…\n"), PaneState::Working);
        assert_eq!(detect("✶ Galloping…\n"), PaneState::Working);
    }

    #[test]
    fn interrupt_hint_is_working() {
        assert_eq!(
            detect("4 files +20 -0 · esc to interrupt\n"),
            PaneState::Working
        );
    }

    #[test]
    fn token_count_is_working() {
        assert_eq!(
            detect("✻ Churning… (esc to interrupt · 1.2k tokens)\n"),
            PaneState::Working
        );
        assert_eq!(detect("523 tokens\n"), PaneState::Working);
    }

    #[test]
    fn running_marker_is_working() {
        assert_eq!(
            detect("⏵⏵ bypass permissions on · cargo test (running)\n"),
            PaneState::Working
        );
    }

    #[test]
    fn prompt_box_is_ready() {
        assert_eq!(detect(IDLE_PANE), PaneState::Ready);
        assert_eq!(detect("❯\n"), PaneState::Ready);
    }

    #[test]
    fn working_beats_trailing_prompt() {
        // A spinner further up the tail window wins even when the buffer
        // ends with a freshly painted prompt box.
        let buf = format!("✻ Thinking… (esc to interrupt)\n{}", IDLE_PANE);
        assert_eq!(detect(&buf), PaneState::Working);
    }

    #[test]
    fn plain_text_is_unknown() {
        assert_eq!(detect("make: *** [all] Error 2\n"), PaneState::Unknown);
        assert_eq!(detect(""), PaneState::Unknown);
        assert_eq!(detect("\n\n\n"), PaneState::Unknown);
    }

    #[test]
    fn detection_is_deterministic() {
        let buf = format!("{}✽ Reticulating…\n", IDLE_PANE);
        let first = detect(&buf);
        for _ in 0..10 {
            assert_eq!(detect(&buf), first);
        }
    }

    #[test]
    fn prose_mentioning_dots_is_not_working() {
        // A line that merely starts with a spinner-set glyph but carries
        // neither ellipsis nor hint stays unclassified.
        assert_eq!(detect("· item one\n· item two\n"), PaneState::Unknown);
    }
}
