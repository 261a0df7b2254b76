use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

const MAX_LOG_CHARS: usize = 4096;
const MAX_BODY_LINES: usize = 200;

// CSI, OSC (BEL or ST terminated), DCS/SOS/PM/APC (ST terminated), then lone two-byte escapes.
const ESCAPE_PATTERN: &str =
    r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[PX^_][^\x1b]*\x1b\\|\x1b.?";

fn escape_re() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ESCAPE_PATTERN))
        .as_ref()
        .map_err(|e| Error::msg(format!("invalid escape pattern: {e}")))
}

/// Make a single line of remote-controlled text safe to put in a log record.
pub fn sanitize_log_line(input: &str) -> Result<String> {
    let stripped = escape_re()?.replace_all(input, "");

    let mut out = String::with_capacity(stripped.len().min(MAX_LOG_CHARS));
    let mut count = 0usize;
    for c in stripped.chars() {
        if count >= MAX_LOG_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
        match c {
            '\t' => out.push(' '),
            c if c.is_control() || is_format_control(c) => continue,
            c => out.push(c),
        }
        count += 1;
    }
    Ok(out)
}

/// Split a response body into sanitised, non-empty log lines.
pub fn sanitize_body(body: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in body.lines() {
        let line = sanitize_log_line(line)?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    if lines.len() > MAX_BODY_LINES {
        let dropped = lines.len() - MAX_BODY_LINES;
        lines.truncate(MAX_BODY_LINES);
        lines.push(format!("...[{dropped} more lines]"));
    }
    Ok(lines)
}

fn is_format_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
