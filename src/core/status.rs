use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusLine {
    pub at: DateTime<Local>,
    pub message: String,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Bounded history of human-readable status lines. A line is only recorded
/// when its message differs from the previous one.
#[derive(Debug, Clone)]
pub struct StatusLog {
    lines: VecDeque<StatusLine>,
    last_message: Option<String>,
    max_lines: usize,
}

impl StatusLog {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_lines.max(1)),
            last_message: None,
            max_lines: max_lines.max(1),
        }
    }

    /// Returns the new line, or `None` when it repeats the previous message.
    pub fn report(&mut self, message: impl Into<String>) -> Option<&StatusLine> {
        let message = message.into();
        if self.last_message.as_deref() == Some(message.as_str()) {
            return None;
        }

        let line = StatusLine { at: Local::now(), message: message.clone() };
        tracing::info!("{}", line);

        self.last_message = Some(message);
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
        self.lines.back()
    }

    pub fn latest(&self) -> Option<&StatusLine> {
        self.lines.back()
    }

    pub fn lines(&self) -> impl Iterator<Item = &StatusLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_duplicates_dropped() {
        let mut log = StatusLog::new(20);
        assert!(log.report("Face not detected").is_some());
        assert!(log.report("Face not detected").is_none());
        assert!(log.report("Session timed out").is_some());
        assert!(log.report("Face not detected").is_some());
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_retention_bound() {
        let mut log = StatusLog::new(3);
        for i in 0..10 {
            log.report(format!("line {}", i));
        }
        let messages: Vec<_> = log.lines().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["line 7", "line 8", "line 9"]);
        assert_eq!(log.latest().unwrap().message, "line 9");
    }

    #[test]
    fn test_display_format() {
        let mut log = StatusLog::new(5);
        let line = log.report("Welcome!").unwrap().to_string();
        assert_eq!(line.len(), "HH:MM:SS - Welcome!".len());
        assert!(line.ends_with(" - Welcome!"));
    }
}
