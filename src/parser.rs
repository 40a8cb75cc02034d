//! One-line command grammar shared by every input surface.
//!
//! `parse` is total: any line maps to a `Command`, with malformed input
//! folded into `Command::Invalid` so callers can surface a diagnostic
//! without treating it as an error path.

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    Status,
    /// `auto N` — enable auto-continue
    Auto(u32),
    /// `stop N` — disable auto-continue
    Stop(u32),
    /// `reset N` — close the circuit, clear the streak
    Reset(u32),
    /// `progress N mark` — clear the streak only
    MarkProgress(u32),
    /// `queue N` — show the queue
    QueueShow(u32),
    /// `queue N <text>` — append to the queue
    QueuePush(u32, String),
    /// `clear N` — empty the queue
    QueueClear(u32),
    /// `N: payload` or `N- payload` — direct send. The payload may carry
    /// `|` separators; splitting happens at dispatch, not here. There is
    /// no escape for a literal `|`.
    Send { id: u32, payload: String },
    /// Anything else, with a human-readable reason
    Invalid(String),
}

pub const HELP_TEXT: &str = "\
commands:
  N: <payload>         send to agent N (| separates queued follow-ups)
  queue N              show agent N's queue
  queue N \"<text>\"     append to agent N's queue
  clear N              empty agent N's queue
  auto N / stop N      enable / disable auto-continue
  reset N              close the circuit and clear the no-progress streak
  progress N mark      clear the no-progress streak
  status               per-agent status
  help                 this text
  quit                 shut down";

/// Parse one raw line into a `Command`. Never panics.
pub fn parse(raw: &str) -> Command {
    let line = raw.trim();
    if line.is_empty() {
        return Command::Invalid("empty command".to_string());
    }

    // Direct send: `N: payload` or `N- payload`.
    if let Some(cmd) = parse_direct(line) {
        return cmd;
    }

    let mut tokens = line.split_whitespace();
    let keyword = tokens.next().unwrap_or_default();
    match keyword {
        "quit" | "exit" => Command::Quit,
        "help" => Command::Help,
        "status" => Command::Status,
        "auto" => with_id(tokens.next(), Command::Auto),
        "stop" => with_id(tokens.next(), Command::Stop),
        "reset" => with_id(tokens.next(), Command::Reset),
        "clear" => with_id(tokens.next(), Command::QueueClear),
        "progress" => match (parse_id(tokens.next()), tokens.next()) {
            (Ok(id), Some("mark")) => Command::MarkProgress(id),
            (Ok(_), other) => Command::Invalid(format!(
                "expected `progress N mark`, got `progress N {}`",
                other.unwrap_or("")
            )),
            (Err(reason), _) => Command::Invalid(reason),
        },
        "queue" => parse_queue(line),
        _ => Command::Invalid(format!("unknown command `{keyword}` (try `help`)")),
    }
}

fn with_id(token: Option<&str>, make: impl FnOnce(u32) -> Command) -> Command {
    match parse_id(token) {
        Ok(id) => make(id),
        Err(reason) => Command::Invalid(reason),
    }
}

fn parse_id(token: Option<&str>) -> Result<u32, String> {
    let token = token.ok_or_else(|| "missing agent id".to_string())?;
    match token.parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        Ok(_) => Err("agent ids are positive".to_string()),
        Err(_) => Err(format!("invalid agent id `{token}`")),
    }
}

fn parse_direct(line: &str) -> Option<Command> {
    let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let rest = &line[digits.len()..];
    let payload = rest.strip_prefix(':').or_else(|| rest.strip_prefix('-'))?;

    let id = match digits.parse::<u32>() {
        Ok(id) if id > 0 => id,
        _ => return Some(Command::Invalid(format!("invalid agent id `{digits}`"))),
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Some(Command::Invalid("missing payload".to_string()));
    }
    Some(Command::Send {
        id,
        payload: payload.to_string(),
    })
}

fn parse_queue(line: &str) -> Command {
    // `queue N [text]` — the text keeps its internal whitespace, so peel
    // tokens off manually instead of splitting the whole line.
    let rest = line["queue".len()..].trim_start();
    let id_token: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
    let id = match parse_id(if id_token.is_empty() {
        None
    } else {
        Some(&id_token)
    }) {
        Ok(id) => id,
        Err(reason) => return Command::Invalid(reason),
    };

    let text = rest[id_token.len()..].trim();
    if text.is_empty() {
        return Command::QueueShow(id);
    }

    let text = strip_quotes(text);
    if text.is_empty() {
        return Command::Invalid("empty queue entry".to_string());
    }
    Command::QueuePush(id, text.to_string())
}

fn strip_quotes(text: &str) -> &str {
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_commands() {
        assert_eq!(parse("quit"), Command::Quit);
        assert_eq!(parse("exit"), Command::Quit);
        assert_eq!(parse("help"), Command::Help);
        assert_eq!(parse("status"), Command::Status);
    }

    #[test]
    fn per_agent_commands() {
        assert_eq!(parse("auto 2"), Command::Auto(2));
        assert_eq!(parse("stop 2"), Command::Stop(2));
        assert_eq!(parse("reset 1"), Command::Reset(1));
        assert_eq!(parse("clear 3"), Command::QueueClear(3));
        assert_eq!(parse("progress 1 mark"), Command::MarkProgress(1));
    }

    #[test]
    fn direct_send_both_separators() {
        assert_eq!(
            parse("1: echo hello"),
            Command::Send {
                id: 1,
                payload: "echo hello".to_string()
            }
        );
        assert_eq!(
            parse("12- run the tests"),
            Command::Send {
                id: 12,
                payload: "run the tests".to_string()
            }
        );
    }

    #[test]
    fn direct_send_keeps_pipes() {
        assert_eq!(
            parse("1: task A | task B | task C"),
            Command::Send {
                id: 1,
                payload: "task A | task B | task C".to_string()
            }
        );
    }

    #[test]
    fn queue_show_and_push() {
        assert_eq!(parse("queue 1"), Command::QueueShow(1));
        assert_eq!(
            parse("queue 1 \"fix the tests\""),
            Command::QueuePush(1, "fix the tests".to_string())
        );
        assert_eq!(
            parse("queue 1 bare words work too"),
            Command::QueuePush(1, "bare words work too".to_string())
        );
    }

    #[test]
    fn malformed_lines_are_invalid_not_errors() {
        for line in [
            "",
            "   ",
            "frobnicate",
            "auto",
            "auto x",
            "auto 0",
            "queue",
            "queue x",
            "progress 1",
            "progress 1 park",
            "1:",
            "1:   ",
            "0: hi",
            "99999999999999999999: hi",
            "queue 2 \"\"",
            "-: hi",
        ] {
            match parse(line) {
                Command::Invalid(_) => {}
                other => panic!("expected Invalid for {line:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn totality_over_arbitrary_bytes() {
        // Smoke the parser with junk; it must always return a variant.
        for line in [
            "💥💥💥",
            ": :",
            "1:1:1:1",
            "queue 1 \"unterminated",
            "--",
            "auto 1 extra",
            "\u{0}\u{1}\u{2}",
        ] {
            let _ = parse(line);
        }
    }
}
