//! JSONL turn logs with secret redaction and retention.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::LoggingConfig;

const TURN_LOG: &str = "session.jsonl";
const AUDIT_LOG: &str = "audit.jsonl";

/// Secret-looking fragments; group 1 is kept, the rest replaced.
static SECRET_PATTERNS: Lazy<[(&'static str, Regex); 4]> = Lazy::new(|| {
    [
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "token",
            Regex::new(r"(?i)((?:access[_-]?)?token\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid token regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "mailto",
            Regex::new(r"(?i)(mailto=)([^&\s]+)").expect("invalid mailto regex"),
        ),
    ]
});

/// What gets recorded about a finished turn.
#[derive(Debug, Clone)]
pub struct TurnLogInput {
    pub session_id: String,
    pub turn: usize,
    pub query: String,
    pub state: String,
    pub answer: String,
    pub failure: Option<String>,
    pub citations: Vec<String>,
    pub failed_providers: Vec<String>,
}

#[derive(Serialize)]
struct TurnRecord<'a> {
    timestamp: String,
    session_id: &'a str,
    turn: usize,
    query: String,
    state: &'a str,
    answer: String,
    failure: Option<String>,
    citations: &'a [String],
    failed_providers: &'a [String],
    redactions: &'a [&'static str],
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    timestamp: &'a str,
    session_id: &'a str,
    turn: usize,
    redactions: &'a [&'static str],
}

/// Scrubs secrets and remembers which kinds it found.
#[derive(Default)]
struct Redactor {
    found: BTreeSet<&'static str>,
}

impl Redactor {
    fn scrub(&mut self, text: &str) -> String {
        let mut scrubbed = text.to_string();
        for (kind, pattern) in SECRET_PATTERNS.iter() {
            if !pattern.is_match(&scrubbed) {
                continue;
            }
            self.found.insert(*kind);
            scrubbed = pattern
                .replace_all(&scrubbed, |caps: &Captures| format!("{}[REDACTED]", &caps[1]))
                .into_owned();
        }
        scrubbed
    }

    fn found(&self) -> Vec<&'static str> {
        self.found.iter().copied().collect()
    }
}

/// Writes one JSON line per turn under `{base_dir}/{YYYY}/{MM}/`.
#[derive(Debug, Clone)]
pub struct TurnLogger {
    base_dir: PathBuf,
    /// `None` keeps logs forever.
    retention: Option<Duration>,
}

impl TurnLogger {
    pub fn new(base_dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            base_dir: base_dir.into(),
            retention: (retention_days > 0)
                .then(|| Duration::from_secs(retention_days.saturating_mul(86_400))),
        }
    }

    /// Logger for the configured directory; turn logging is off without one.
    pub fn from_config(config: &LoggingConfig) -> Option<Self> {
        config
            .session_log_dir
            .as_ref()
            .map(|dir| Self::new(dir, config.retention_days))
    }

    fn month_dir(&self, at: &DateTime<Utc>) -> PathBuf {
        self.base_dir
            .join(format!("{:04}", at.year()))
            .join(format!("{:02}", at.month()))
    }

    /// Append `input` and prune expired files. Returns the turn log path.
    pub fn record(&self, input: &TurnLogInput) -> Result<PathBuf> {
        let now = Utc::now();
        let timestamp = now.to_rfc3339();
        let mut redactor = Redactor::default();

        let query = redactor.scrub(&input.query);
        let answer = redactor.scrub(&input.answer);
        let failure = input.failure.as_deref().map(|f| redactor.scrub(f));
        let redactions = redactor.found();

        let dir = self.month_dir(&now);
        let turn_log = dir.join(TURN_LOG);
        append_line(
            &turn_log,
            &TurnRecord {
                timestamp: timestamp.clone(),
                session_id: &input.session_id,
                turn: input.turn,
                query,
                state: &input.state,
                answer,
                failure,
                citations: &input.citations,
                failed_providers: &input.failed_providers,
                redactions: &redactions,
            },
        )?;

        if !redactions.is_empty() {
            append_line(
                &dir.join(AUDIT_LOG),
                &AuditRecord {
                    timestamp: &timestamp,
                    session_id: &input.session_id,
                    turn: input.turn,
                    redactions: &redactions,
                },
            )?;
            warn!(
                session_id = %input.session_id,
                kinds = ?redactions,
                "redacted potential secrets from turn log"
            );
        }

        if let Some(retention) = self.retention {
            let cutoff = SystemTime::now()
                .checked_sub(retention)
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let removed = prune_older_than(&self.base_dir, cutoff)?;
            if removed > 0 {
                debug!(removed, "pruned expired turn logs");
            }
        }
        Ok(turn_log)
    }
}

fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    }
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(&line))
        .with_context(|| format!("failed to append to {}", path.display()))
}

/// Remove files last modified before `cutoff` and any directories left empty.
fn prune_older_than(dir: &Path, cutoff: SystemTime) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            removed += prune_older_than(&path, cutoff)?;
            if fs::read_dir(&path)?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
            continue;
        }
        let expired = fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .is_ok_and(|modified| modified < cutoff);
        if expired && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    fn input(query: &str, answer: &str) -> TurnLogInput {
        TurnLogInput {
            session_id: "session-1".into(),
            turn: 1,
            query: query.into(),
            state: "done".into(),
            answer: answer.into(),
            failure: None,
            citations: vec!["doi:10.1/x".into()],
            failed_providers: vec![],
        }
    }

    #[test]
    fn turn_records_are_redacted_and_audited() -> Result<()> {
        let temp = TempDir::new()?;
        let logger = TurnLogger::new(temp.path(), 0);
        let path = logger.record(&input("qec api_key=abcd1234", "Findings with bearer abc.def"))?;

        let line = fs::read_to_string(&path)?;
        let record: Value = serde_json::from_str(line.trim())?;
        assert_eq!(record["session_id"], "session-1");
        assert_eq!(record["query"], "qec api_key=[REDACTED]");
        assert_eq!(record["answer"], "Findings with bearer [REDACTED]");
        assert_eq!(record["redactions"], serde_json::json!(["api_key", "bearer"]));
        assert!(path.with_file_name(AUDIT_LOG).exists());
        Ok(())
    }

    #[test]
    fn clean_records_skip_the_audit_file() -> Result<()> {
        let temp = TempDir::new()?;
        let logger = TurnLogger::new(temp.path(), 90);
        let path = logger.record(&input("surface codes", "No secrets here"))?;
        logger.record(&input("surface codes", "Still none"))?;

        assert_eq!(fs::read_to_string(&path)?.lines().count(), 2);
        assert!(!path.with_file_name(AUDIT_LOG).exists());
        Ok(())
    }

    #[test]
    fn logging_is_off_without_a_directory() {
        assert!(TurnLogger::from_config(&LoggingConfig::default()).is_none());
    }
}
