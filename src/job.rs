//! Job Descriptor and Input Validation
//!
//! A `RawJob` carries the operator's input as entered. `RawJob::validate`
//! runs every check and either yields an immutable `Job` or the full list of
//! failures; a `Job` cannot be built any other way.

use crate::config::{TapeImgrConfig, BLOCK_SIZE_LIMIT};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Job descriptor as supplied by the front end (unvalidated strings)
#[derive(Debug, Clone, PartialEq)]
pub struct RawJob {
    pub dir_out: String,
    pub tape_device: String,
    pub init_block_size: String,
    pub sessions: String,
    pub prefix: String,
    pub extension: String,
    pub fill_blocks: bool,
}

impl RawJob {
    /// Raw job pre-filled from configuration defaults
    pub fn from_config(dir_out: impl Into<String>, config: &TapeImgrConfig) -> Self {
        Self {
            dir_out: dir_out.into(),
            tape_device: config.tape_device.clone(),
            init_block_size: config.init_block_size.to_string(),
            sessions: String::new(),
            prefix: config.prefix.clone(),
            extension: config.extension.clone(),
            fill_blocks: config.fill_blocks,
        }
    }

    /// Run all checks. Never short-circuits: every failure is reported.
    pub fn validate(&self) -> Result<ValidatedJob, ValidationErrors> {
        let dir_out = PathBuf::from(self.dir_out.trim());
        let mut failures = Vec::new();

        if !dir_out.is_dir() {
            failures.push(ValidationFailure::DirectoryNotFound(dir_out.clone()));
        }

        if !is_writable_dir(&dir_out) {
            failures.push(ValidationFailure::DirectoryNotWritable(dir_out.clone()));
        }

        let block_size = parse_block_size(&self.init_block_size);
        if block_size.is_none() {
            failures.push(ValidationFailure::InvalidBlockSize(
                self.init_block_size.clone(),
            ));
        }

        let sessions = parse_session_list(&self.sessions);
        if sessions.is_none() {
            failures.push(ValidationFailure::InvalidSessionList(self.sessions.clone()));
        }

        match (block_size, sessions) {
            (Some(init_block_size), Some(sessions)) if failures.is_empty() => {
                let job = Job {
                    dir_out,
                    tape_device: self.tape_device.trim().to_string(),
                    init_block_size,
                    sessions,
                    prefix: self.prefix.trim().to_string(),
                    extension: normalize_extension(&self.extension),
                    fill_blocks: self.fill_blocks,
                };

                let mut warnings = Vec::new();
                let existing = job.existing_outputs();
                if !existing.is_empty() {
                    warnings.push(ValidationWarning::OutputExists {
                        dir_out: job.dir_out.clone(),
                        files: existing,
                    });
                }

                debug!("Job validated: {:?}", job);
                Ok(ValidatedJob { job, warnings })
            }
            _ => Err(ValidationErrors(failures)),
        }
    }
}

/// Validated job descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    dir_out: PathBuf,
    tape_device: String,
    init_block_size: usize,
    sessions: BTreeSet<u32>,
    prefix: String,
    extension: String,
    fill_blocks: bool,
}

impl Job {
    pub fn dir_out(&self) -> &Path {
        &self.dir_out
    }

    pub fn tape_device(&self) -> &str {
        &self.tape_device
    }

    pub fn init_block_size(&self) -> usize {
        self.init_block_size
    }

    pub fn sessions(&self) -> &BTreeSet<u32> {
        &self.sessions
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn fill_blocks(&self) -> bool {
        self.fill_blocks
    }

    /// An empty session list selects every session
    pub fn wants_session(&self, session: u32) -> bool {
        self.sessions.is_empty() || self.sessions.contains(&session)
    }

    /// `<prefix><session:06>.<extension>`
    pub fn session_file_name(&self, session: u32) -> String {
        format!("{}{:06}.{}", self.prefix, session, self.extension)
    }

    pub fn session_path(&self, session: u32) -> PathBuf {
        self.dir_out.join(self.session_file_name(session))
    }

    /// Files in the output directory that match `<prefix>*.<extension>`
    pub fn existing_outputs(&self) -> Vec<PathBuf> {
        let suffix = format!(".{}", self.extension);
        let mut found: Vec<PathBuf> = match std::fs::read_dir(&self.dir_out) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_file())
                .filter(|entry| {
                    let name = entry.file_name().to_string_lossy().to_string();
                    name.starts_with(&self.prefix) && name.ends_with(&suffix)
                })
                .map(|entry| entry.path())
                .collect(),
            Err(_) => Vec::new(),
        };
        found.sort();
        found
    }
}

/// A validated job together with any non-fatal warnings
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedJob {
    pub job: Job,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("Output directory doesn't exist: {0:?}")]
    DirectoryNotFound(PathBuf),

    #[error("Cannot write to directory {0:?}")]
    DirectoryNotWritable(PathBuf),

    #[error("Block size not valid: {0:?}")]
    InvalidBlockSize(String),

    #[error("Sessions value not valid: {0:?} (must be comma-delimited integers >= 1, or empty)")]
    InvalidSessionList(String),
}

/// Non-fatal findings; the caller decides whether to proceed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    OutputExists { dir_out: PathBuf, files: Vec<PathBuf> },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::OutputExists { dir_out, files } => write!(
                f,
                "writing to {:?} will overwrite {} existing file(s)",
                dir_out,
                files.len()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationFailure>);

impl std::error::Error for ValidationErrors {}

impl ValidationErrors {
    pub fn failures(&self) -> &[ValidationFailure] {
        &self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

pub(crate) fn is_writable_dir(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }

    let probe = dir.join(format!(".tapeimgr-write-test-{}", std::process::id()));
    match OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(file) => {
            drop(file);
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(e) => {
            debug!("Write probe failed in {:?}: {}", dir, e);
            false
        }
    }
}

fn parse_block_size(input: &str) -> Option<usize> {
    match input.trim().parse::<usize>() {
        Ok(size) if size > 0 && size <= BLOCK_SIZE_LIMIT => Some(size),
        _ => None,
    }
}

/// Empty input selects all sessions; otherwise every item must be an integer >= 1
fn parse_session_list(input: &str) -> Option<BTreeSet<u32>> {
    let input = input.trim();
    if input.is_empty() {
        return Some(BTreeSet::new());
    }

    input
        .split(',')
        .map(|item| match item.trim().parse::<u32>() {
            Ok(n) if n >= 1 => Some(n),
            _ => None,
        })
        .collect()
}

fn normalize_extension(input: &str) -> String {
    input.trim().trim_start_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(dir: &Path) -> RawJob {
        RawJob {
            dir_out: dir.to_string_lossy().to_string(),
            tape_device: "/dev/nst0".to_string(),
            init_block_size: "512".to_string(),
            sessions: String::new(),
            prefix: "session".to_string(),
            extension: "dat".to_string(),
            fill_blocks: false,
        }
    }

    #[test]
    fn test_valid_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = raw(dir.path());
        input.sessions = " 3, 1 ,2".to_string();
        input.extension = ".img".to_string();

        let validated = input.validate().unwrap();
        let job = validated.job;
        assert!(validated.warnings.is_empty());
        assert_eq!(job.init_block_size(), 512);
        assert_eq!(job.sessions().iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(job.extension(), "img");
        assert_eq!(job.session_file_name(7), "session000007.img");
        assert!(job.wants_session(2));
        assert!(!job.wants_session(4));
    }

    #[test]
    fn test_empty_session_list_selects_everything() {
        let dir = tempfile::tempdir().unwrap();
        let job = raw(dir.path()).validate().unwrap().job;
        assert!(job.sessions().is_empty());
        assert!(job.wants_session(1));
        assert!(job.wants_session(999));
    }

    #[test]
    fn test_all_failures_reported_together() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let mut input = raw(&missing);
        input.init_block_size = "0".to_string();
        input.sessions = "1,x".to_string();

        let errors = input.validate().unwrap_err();
        assert_eq!(
            errors.failures(),
            &[
                ValidationFailure::DirectoryNotFound(missing.clone()),
                ValidationFailure::DirectoryNotWritable(missing),
                ValidationFailure::InvalidBlockSize("0".to_string()),
                ValidationFailure::InvalidSessionList("1,x".to_string()),
            ]
        );
    }

    #[test]
    fn test_session_list_rejects_zero_and_negative() {
        assert!(parse_session_list("0").is_none());
        assert!(parse_session_list("-1").is_none());
        assert!(parse_session_list("1,,2").is_none());
        assert_eq!(parse_session_list("").unwrap().len(), 0);
    }

    #[test]
    fn test_block_size_rejects_garbage() {
        assert_eq!(parse_block_size(" 1024 "), Some(1024));
        assert!(parse_block_size("-512").is_none());
        assert!(parse_block_size("abc").is_none());
        assert!(parse_block_size("").is_none());
    }

    #[test]
    fn test_block_size_capped() {
        assert_eq!(parse_block_size("16777216"), Some(BLOCK_SIZE_LIMIT));
        assert!(parse_block_size("16777217").is_none());
        assert!(parse_block_size("99999999999").is_none());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let good = raw(dir.path());
        assert_eq!(good.validate(), good.validate());

        let mut bad = raw(&dir.path().join("nowhere"));
        bad.init_block_size = "big".to_string();
        assert_eq!(bad.validate(), bad.validate());
    }

    #[test]
    fn test_existing_output_warning() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("session000001.dat"), b"old").unwrap();
        std::fs::write(dir.path().join("other.dat"), b"unrelated").unwrap();

        let validated = raw(dir.path()).validate().unwrap();
        assert_eq!(validated.warnings.len(), 1);
        match &validated.warnings[0] {
            ValidationWarning::OutputExists { files, .. } => {
                assert_eq!(files, &vec![dir.path().join("session000001.dat")]);
            }
        }
    }
}
