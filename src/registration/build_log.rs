// Build-log query surface: the raw text view and the structured view with a
// status header, plus the slicing rules (skip+limit window, first_n, last_n).

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};
use crate::store::{BuildLog, BuildLogLine, RegistrationState};

/// Which lines of a build log to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSlice {
    Window { skip: usize, limit: Option<usize> },
    FirstN(usize),
    LastN(usize),
}

impl Default for LogSlice {
    fn default() -> Self {
        LogSlice::Window {
            skip: 0,
            limit: None,
        }
    }
}

impl LogSlice {
    /// Build a slice from the raw query fields. `first_n` and `last_n` are
    /// mutually exclusive and take precedence over the skip/limit window.
    pub fn from_query(
        skip: Option<usize>,
        limit: Option<usize>,
        first_n: Option<usize>,
        last_n: Option<usize>,
    ) -> Result<Self> {
        match (first_n, last_n) {
            (Some(_), Some(_)) => Err(RegistryError::InvalidInput(
                "cannot specify both first_n and last_n".to_string(),
            )),
            (Some(n), None) => Ok(LogSlice::FirstN(n)),
            (None, Some(n)) => Ok(LogSlice::LastN(n)),
            (None, None) => Ok(LogSlice::Window {
                skip: skip.unwrap_or(0),
                limit,
            }),
        }
    }

    /// Returns the offset of the first returned line and the lines.
    fn apply<'a>(&self, lines: &'a [BuildLogLine]) -> (usize, &'a [BuildLogLine]) {
        match *self {
            LogSlice::Window { skip, limit } => {
                let start = skip.min(lines.len());
                let end = match limit {
                    Some(limit) => start.saturating_add(limit).min(lines.len()),
                    None => lines.len(),
                };
                (start, &lines[start..end])
            }
            LogSlice::FirstN(n) => (0, &lines[..n.min(lines.len())]),
            LogSlice::LastN(n) => {
                let start = lines.len().saturating_sub(n);
                (start, &lines[start..])
            }
        }
    }
}

/// Structured build-log view: the status header plus a window of lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedBuildLog {
    pub registration_id: String,
    pub timestamp: i64,
    pub git_url: String,
    pub module_name_lc: Option<String>,
    pub registration: RegistrationState,
    pub error_message: String,
    /// Index of the first line in `log` within the full log.
    pub log_offset: usize,
    pub log: Vec<BuildLogLine>,
}

pub fn parse_build_log(log: &BuildLog, slice: LogSlice) -> ParsedBuildLog {
    let (offset, lines) = slice.apply(&log.log);
    ParsedBuildLog {
        registration_id: log.registration_id.clone(),
        timestamp: log.timestamp,
        git_url: log.git_url.clone(),
        module_name_lc: log.module_name_lc.clone(),
        registration: log.registration.clone(),
        error_message: log.error_message.clone(),
        log_offset: offset,
        log: lines.to_vec(),
    }
}

/// The raw text rendering: one log line per text line, sliced the same way.
pub fn raw_build_log(log: &BuildLog, slice: LogSlice) -> String {
    let (_, lines) = slice.apply(&log.log);
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.content);
        out.push('\n');
    }
    out
}
