use std::{collections::HashMap, sync::RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{classify::RecordKind, error::JobError, upsert::UpsertAction};

pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 100;

pub fn clamp_batch_size(value: i64) -> usize {
    value.clamp(MIN_BATCH_SIZE as i64, MAX_BATCH_SIZE as i64) as usize
}

fn deserialize_batch_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(clamp_batch_size(i64::deserialize(deserializer)?))
}

/// Options fixed at upload time. JSON keys are camelCase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportOptions {
    pub dry_run: bool,
    #[serde(deserialize_with = "deserialize_batch_size")]
    pub batch_size: usize,
    pub skip_validation: bool,
    pub skip_association: bool,
    pub auto_detect_type: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: DEFAULT_BATCH_SIZE,
            skip_validation: false,
            skip_association: false,
            auto_detect_type: true,
        }
    }
}

impl ImportOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = clamp_batch_size(batch_size);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStage {
    Queued,
    Parsing,
    Processing,
    Completed,
    Failed,
}

impl ImportStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, ImportStage::Completed | ImportStage::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub stage: ImportStage,
    pub progress: u8,
    pub message: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportProgress {
    pub fn queued() -> Self {
        Self {
            stage: ImportStage::Queued,
            progress: 0,
            message: "Queued".to_string(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Moves to `stage`. Progress never goes backwards and only a terminal
    /// stage reaches 100.
    pub fn advance(&mut self, stage: ImportStage, progress: u8, message: impl Into<String>) {
        let progress = if stage.is_terminal() {
            100
        } else {
            progress.min(99)
        };
        self.stage = stage;
        self.progress = self.progress.max(progress);
        self.message = message.into();
        if stage.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Processing progress for `processed` of `total` rows: 10..=95.
pub fn processing_progress(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 95;
    }
    let pct = 10.0 + (processed as f64 / total as f64) * 85.0;
    pct.min(95.0) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowErrorEntry {
    pub row: usize,
    pub error: String,
}

/// Per-kind counters, keyed the way the result is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub clienti_privati: usize,
    pub clienti_aziende: usize,
    pub contratti_luce: usize,
    pub contratti_gas: usize,
}

impl KindCounts {
    fn slot(&mut self, kind: RecordKind) -> Option<&mut usize> {
        match kind {
            RecordKind::ClientPrivate => Some(&mut self.clienti_privati),
            RecordKind::ClientCompany => Some(&mut self.clienti_aziende),
            RecordKind::ContractElectricity => Some(&mut self.contratti_luce),
            RecordKind::ContractGas => Some(&mut self.contratti_gas),
            RecordKind::Unknown => None,
        }
    }

    pub fn increment(&mut self, kind: RecordKind) {
        if let Some(slot) = self.slot(kind) {
            *slot += 1;
        }
    }

    pub fn get(&self, kind: RecordKind) -> usize {
        match kind {
            RecordKind::ClientPrivate => self.clienti_privati,
            RecordKind::ClientCompany => self.clienti_aziende,
            RecordKind::ContractElectricity => self.contratti_luce,
            RecordKind::ContractGas => self.contratti_gas,
            RecordKind::Unknown => 0,
        }
    }

    pub fn total(&self) -> usize {
        self.clienti_privati + self.clienti_aziende + self.contratti_luce + self.contratti_gas
    }
}

/// A client created on the fly for a contract row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerOutcome {
    pub kind: RecordKind,
    pub action: UpsertAction,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub row: usize,
    pub kind: RecordKind,
    pub action: UpsertAction,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub file_name: String,
    pub total_rows: usize,
    pub processed: usize,
    pub errors: Vec<RowErrorEntry>,
    pub inserted: KindCounts,
    pub updated: KindCounts,
    pub warnings: Vec<String>,
    pub rows: Vec<RowOutcome>,
    pub dry_run: bool,
}

impl ImportResult {
    pub fn new(file_name: &str, total_rows: usize, dry_run: bool) -> Self {
        Self {
            file_name: file_name.to_string(),
            total_rows,
            dry_run,
            ..Self::default()
        }
    }

    pub fn record_error(&mut self, row: usize, error: impl ToString) {
        self.errors.push(RowErrorEntry {
            row,
            error: error.to_string(),
        });
    }

    /// Counts a successful row and, when present, its inline owner.
    pub fn record_outcome(&mut self, outcome: RowOutcome) {
        if let Some(owner) = &outcome.owner {
            self.count(owner.kind, owner.action);
        }
        self.count(outcome.kind, outcome.action);
        self.rows.push(outcome);
    }

    fn count(&mut self, kind: RecordKind, action: UpsertAction) {
        match action {
            UpsertAction::Inserted => self.inserted.increment(kind),
            UpsertAction::Updated => self.updated.increment(kind),
        }
    }

    pub fn finish(&mut self) {
        self.success = self.errors.is_empty();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: String,
    pub file_name: String,
    pub options: ImportOptions,
    pub progress: ImportProgress,
    pub result: ImportResult,
}

impl ImportJob {
    pub fn new(id: impl Into<String>, file_name: &str, options: ImportOptions) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.to_string(),
            options,
            progress: ImportProgress::queued(),
            result: ImportResult::new(file_name, 0, options.dry_run),
        }
    }
}

/// Where jobs live between upload and polling.
pub trait JobStore: Send + Sync {
    fn put(&self, job: ImportJob) -> Result<(), JobError>;
    fn get(&self, id: &str) -> Result<Option<ImportJob>, JobError>;
    /// Applies `change` to a job that has not reached a terminal stage.
    fn update(&self, id: &str, change: &mut dyn FnMut(&mut ImportJob)) -> Result<(), JobError>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, ImportJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn put(&self, job: ImportJob) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().map_err(|_| JobError::Poisoned)?;
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ImportJob>, JobError> {
        let jobs = self.jobs.read().map_err(|_| JobError::Poisoned)?;
        Ok(jobs.get(id).cloned())
    }

    fn update(&self, id: &str, change: &mut dyn FnMut(&mut ImportJob)) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().map_err(|_| JobError::Poisoned)?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        if job.progress.stage.is_terminal() {
            return Err(JobError::Terminal(id.to_string()));
        }
        change(job);
        Ok(())
    }
}
