use std::fmt;

/// One recorded trigger: milliseconds since the start of the recording and
/// the text that accompanied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub at_ms: u64,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parses `<ms> <payload>` lines. Blank lines and `#` comments are skipped.
pub fn parse_trace(raw: &str) -> Result<Vec<TraceEvent>, ParseError> {
    let mut events: Vec<TraceEvent> = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        let clean = line.trim();
        if clean.is_empty() || clean.starts_with('#') {
            continue;
        }
        let (time, payload) = clean.split_once(char::is_whitespace).unwrap_or((clean, ""));
        let at_ms = time
            .parse::<u64>()
            .map_err(|_| ParseError::new(line_no, format!("invalid time {time:?}")))?;
        if let Some(prev) = events.last() {
            if at_ms < prev.at_ms {
                return Err(ParseError::new(line_no, "time goes backwards"));
            }
        }
        events.push(TraceEvent {
            at_ms,
            payload: payload.trim().to_string(),
        });
    }
    Ok(events)
}
