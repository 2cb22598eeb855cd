//! Decision ledger: append-only CSV log of processed messages.
//!
//! The ledger is the dedup source of truth: the seen-set is rebuilt from the
//! file every time it is opened, and each append writes and flushes exactly
//! one row. Existing rows are never rewritten.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::pipeline::types::{NormalizedMessage, TriageOutcome};

/// Header row. Field order and names are read by downstream tooling.
pub const LEDGER_HEADER: [&str; 8] = [
    "message_id",
    "sender",
    "recipient",
    "subject",
    "category",
    "suggested_action",
    "confidence",
    "labels",
];

/// One row of the ledger.
///
/// Decision fields are `None`/empty for inconclusive outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub message_id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub category: Option<String>,
    pub suggested_action: Option<String>,
    pub confidence: Option<f64>,
    pub labels: Vec<String>,
}

impl LedgerEntry {
    /// Project a message and its outcome into a row.
    pub fn new(message_id: &str, message: &NormalizedMessage, outcome: &TriageOutcome) -> Self {
        let decision = outcome.decision();
        Self {
            message_id: message_id.to_string(),
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            subject: message.subject.clone(),
            category: decision.and_then(|d| d.category.as_ref().map(|c| c.to_string())),
            suggested_action: decision
                .and_then(|d| d.suggested_action.as_ref().map(|a| a.to_string())),
            confidence: decision.map(|d| d.confidence),
            labels: decision.map(|d| d.labels.clone()).unwrap_or_default(),
        }
    }

    fn to_record(&self) -> [String; 8] {
        [
            self.message_id.clone(),
            self.sender.clone(),
            self.recipient.clone(),
            self.subject.clone(),
            self.category.clone().unwrap_or_default(),
            self.suggested_action.clone().unwrap_or_default(),
            self.confidence.map(|c| c.to_string()).unwrap_or_default(),
            self.labels.join(","),
        ]
    }

    fn from_record(record: &StringRecord) -> Self {
        let field = |i: usize| record.get(i).unwrap_or("").to_string();
        let optional = |i: usize| Some(field(i)).filter(|s| !s.is_empty());

        Self {
            message_id: field(0),
            sender: field(1),
            recipient: field(2),
            subject: field(3),
            category: optional(4),
            suggested_action: optional(5),
            confidence: optional(6).and_then(|s| s.parse().ok()),
            labels: optional(7)
                .map(|s| s.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// CSV-backed ledger. Single writer.
pub struct CsvLedger {
    path: PathBuf,
    seen: HashSet<String>,
}

impl CsvLedger {
    /// Open the ledger at `path`, rebuilding the seen-set from its rows.
    ///
    /// A missing file is an empty ledger; it is created on first append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let seen = read_entries(&path)?
            .into_iter()
            .map(|entry| entry.message_id)
            .collect::<HashSet<_>>();

        info!(path = %path.display(), seen = seen.len(), "Ledger opened");
        Ok(Self { path, seen })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a message id has already been recorded.
    pub fn is_seen(&self, message_id: &str) -> bool {
        self.seen.contains(message_id)
    }

    /// Number of distinct message ids recorded.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Append one row for `message_id`.
    ///
    /// Returns `false` without writing when the id is already recorded
    /// (first write wins).
    pub fn append(
        &mut self,
        message_id: &str,
        message: &NormalizedMessage,
        outcome: &TriageOutcome,
    ) -> Result<bool, LedgerError> {
        if self.is_seen(message_id) {
            debug!(id = %message_id, "Already in ledger, not appending");
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;
        if !needs_header && !ends_with_newline(&mut file)? {
            warn!(path = %self.path.display(), "Ledger ends mid-row, starting a new line");
            file.write_all(b"\n")?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(LEDGER_HEADER)?;
        }
        writer.write_record(LedgerEntry::new(message_id, message, outcome).to_record())?;
        writer.flush()?;

        self.seen.insert(message_id.to_string());
        debug!(id = %message_id, path = %self.path.display(), "Ledger row appended");
        Ok(true)
    }

    /// Read every row back, in file order.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        read_entries(&self.path)
    }
}

fn ends_with_newline(file: &mut File) -> Result<bool, LedgerError> {
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn read_entries(path: &Path) -> Result<Vec<LedgerEntry>, LedgerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    if headers.iter().ne(LEDGER_HEADER) {
        return Err(LedgerError::BadHeader {
            path: path.display().to_string(),
            found: headers.iter().collect::<Vec<_>>().join(","),
        });
    }

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != LEDGER_HEADER.len() {
            // Left behind by an interrupted append; the message was never recorded.
            warn!(
                path = %path.display(),
                line = record.position().map(|p| p.line()).unwrap_or_default(),
                fields = record.len(),
                "Skipping incomplete ledger row"
            );
            continue;
        }
        entries.push(LedgerEntry::from_record(&record));
    }
    Ok(entries)
}
