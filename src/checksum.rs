//! Checksum Manifest
//!
//! SHA-512 digests of the extracted session files, written to
//! `checksums.sha512` in `sha512sum` format (`<hex digest>  <file name>`),
//! one line per file in lexicographic file name order.

use crate::config::CHECKSUM_FILE_NAME;
use crate::error::{Result, TapeImgrError};
use sha2::{Digest, Sha512};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files are hashed in chunks of this size
pub const CHUNK_SIZE: usize = 1 << 20;

/// Blockwise SHA-512 calculator
pub struct BlockwiseDigest {
    hasher: Sha512,
    bytes_processed: u64,
}

impl Default for BlockwiseDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockwiseDigest {
    pub fn new() -> Self {
        Self {
            hasher: Sha512::new(),
            bytes_processed: 0,
        }
    }

    /// Feed the next block of data
    pub fn propagate(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_processed += data.len() as u64;
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Lowercase hex digest, as printed by `sha512sum`
    pub fn hex_value(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Streaming SHA-512 of a file of any size
pub fn file_sha512(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut digest = BlockwiseDigest::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        digest.propagate(&buffer[..n]);
    }

    debug!(
        "SHA-512 of {} ({} bytes) computed",
        path.display(),
        digest.bytes_processed()
    );
    Ok(digest.hex_value())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file_name: String,
    pub digest: String,
}

impl ManifestEntry {
    pub fn line(&self) -> String {
        format!("{}  {}", self.digest, self.file_name)
    }

    /// Parse a `sha512sum` style line (binary-mode `*` marker accepted)
    pub fn parse_line(line: &str) -> Option<Self> {
        let (digest, rest) = line.split_once(char::is_whitespace)?;
        let file_name = rest.trim_start().trim_start_matches('*');
        if digest.len() != 128 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        if file_name.is_empty() {
            return None;
        }
        Some(Self {
            file_name: file_name.to_string(),
            digest: digest.to_lowercase(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub path: PathBuf,
    pub entries: Vec<ManifestEntry>,
}

/// Regular files directly inside `dir` with the given extension, sorted by name.
/// The manifest itself is never included.
pub fn collect_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let suffix = format!(".{}", extension);
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            TapeImgrError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Cannot list {:?}: {}", dir, e),
            ))
        })?;

        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name == CHECKSUM_FILE_NAME {
            continue;
        }
        if name.ends_with(&suffix) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Digest every `*.<extension>` file in `dir` without writing anything
pub fn compute_entries(dir: &Path, extension: &str) -> Result<Vec<ManifestEntry>> {
    collect_files(dir, extension)?
        .iter()
        .map(|path| {
            Ok(ManifestEntry {
                file_name: file_name_of(path),
                digest: file_sha512(path)?,
            })
        })
        .collect()
}

/// Digest every `*.<extension>` file in `dir` and write `checksums.sha512`.
///
/// Digest failures are reported as IO errors; failures creating or writing
/// the manifest are `ChecksumWriteFailed`.
pub fn write_manifest(dir: &Path, extension: &str) -> Result<Manifest> {
    let entries = compute_entries(dir, extension)?;
    let path = dir.join(CHECKSUM_FILE_NAME);

    let write = || -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&path)?);
        for entry in &entries {
            writeln!(writer, "{}", entry.line())?;
        }
        writer.flush()
    };

    write().map_err(|e| {
        TapeImgrError::checksum_write(format!("{}: {}", path.display(), e))
    })?;

    info!(
        "Checksum file written: {} ({} entries)",
        path.display(),
        entries.len()
    );
    Ok(Manifest { path, entries })
}

pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match ManifestEntry::parse_line(line) {
            Some(entry) => entries.push(entry),
            None => {
                return Err(TapeImgrError::parse(format!(
                    "{}:{}: malformed checksum line",
                    path.display(),
                    number + 1
                )))
            }
        }
    }

    Ok(Manifest {
        path: path.to_path_buf(),
        entries,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub verified: Vec<String>,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }
}

/// Re-digest every file listed in `<dir>/checksums.sha512`
pub fn verify_manifest(dir: &Path) -> Result<VerifyReport> {
    let manifest = read_manifest(&dir.join(CHECKSUM_FILE_NAME))?;
    let mut report = VerifyReport::default();

    for entry in &manifest.entries {
        let path = dir.join(&entry.file_name);
        if !path.is_file() {
            warn!("Missing file listed in manifest: {}", entry.file_name);
            report.missing.push(entry.file_name.clone());
            continue;
        }

        if file_sha512(&path)? == entry.digest {
            report.verified.push(entry.file_name.clone());
        } else {
            warn!("Checksum mismatch: {}", entry.file_name);
            report.mismatched.push(entry.file_name.clone());
        }
    }

    Ok(report)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
