use std::{
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    classify::RecordKind,
    config::ImportConfig,
    error::{ImportError, JobError},
    job::{ImportJob, ImportOptions, ImportProgress, ImportResult, InMemoryJobStore, JobStore},
    orchestrator::{Importer, fail_job, parse_upload},
    parser::ParsedTable,
    store::StoreFactory,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub import_id: String,
    pub message: String,
    pub total_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SupportedType {
    pub id: &'static str,
    pub label: &'static str,
}

pub fn supported_types() -> Vec<SupportedType> {
    RecordKind::SUPPORTED
        .iter()
        .map(|kind| SupportedType {
            id: kind.as_str(),
            label: kind.label(),
        })
        .collect()
}

pub struct ImportService {
    jobs: Arc<dyn JobStore>,
    stores: Arc<dyn StoreFactory>,
    config: Arc<ImportConfig>,
    run_lock: Arc<Mutex<()>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ImportService {
    pub fn new(stores: Arc<dyn StoreFactory>, config: ImportConfig) -> Self {
        Self::with_job_store(stores, config, Arc::new(InMemoryJobStore::new()))
    }

    pub fn with_job_store(
        stores: Arc<dyn StoreFactory>,
        config: ImportConfig,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            jobs,
            stores,
            config: Arc::new(config),
            run_lock: Arc::new(Mutex::new(())),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    fn create_job(&self, file_name: &str, options: ImportOptions) -> Result<String, ImportError> {
        let id = Uuid::new_v4().to_string();
        self.jobs.put(ImportJob::new(id.clone(), file_name, options))?;
        Ok(id)
    }

    /// Registers a job for `bytes` and starts it in the background.
    ///
    /// A file that cannot be parsed still yields a receipt; the job is then
    /// already `failed` and the message says why.
    pub fn submit(
        &self,
        file_name: &str,
        bytes: &[u8],
        options: ImportOptions,
    ) -> Result<UploadReceipt, ImportError> {
        let import_id = self.create_job(file_name, options)?;
        let table = match parse_upload(self.jobs.as_ref(), &import_id, file_name, bytes, None) {
            Ok(table) => table,
            Err(err) => {
                return Ok(UploadReceipt {
                    import_id,
                    message: format!("Import failed: {err}"),
                    total_rows: 0,
                });
            }
        };
        let total_rows = table.len();

        let jobs = Arc::clone(&self.jobs);
        let stores = Arc::clone(&self.stores);
        let config = Arc::clone(&self.config);
        let run_lock = Arc::clone(&self.run_lock);
        let job_id = import_id.clone();
        let name = file_name.to_string();
        let spawned = thread::Builder::new()
            .name(format!("import-{}", &import_id[..8]))
            .spawn(move || {
                let _running = run_lock.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(err) = execute(
                    jobs.as_ref(),
                    stores.as_ref(),
                    &config,
                    &job_id,
                    &name,
                    options,
                    &table,
                ) {
                    error!("Import job {job_id} failed: {err}");
                }
            });
        match spawned {
            Ok(handle) => self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle),
            Err(err) => {
                let err = ImportError::from(err);
                let mut result = ImportResult::new(file_name, total_rows, options.dry_run);
                result.record_error(0, &err);
                result.finish();
                fail_job(self.jobs.as_ref(), &import_id, result, &err);
                return Err(err);
            }
        }
        info!("Accepted '{file_name}' as import {import_id} ({total_rows} record(s))");
        Ok(UploadReceipt {
            import_id,
            message: "File uploaded, import started".to_string(),
            total_rows,
        })
    }

    /// Runs a whole job on the calling thread and returns its final state.
    pub fn import_blocking(
        &self,
        file_name: &str,
        bytes: &[u8],
        options: ImportOptions,
        delimiter: Option<u8>,
    ) -> Result<ImportJob, ImportError> {
        let import_id = self.create_job(file_name, options)?;
        if let Ok(table) =
            parse_upload(self.jobs.as_ref(), &import_id, file_name, bytes, delimiter)
        {
            let _running = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = execute(
                self.jobs.as_ref(),
                self.stores.as_ref(),
                &self.config,
                &import_id,
                file_name,
                options,
                &table,
            ) {
                warn!("Import job {import_id} failed: {err}");
            }
        }
        self.jobs
            .get(&import_id)?
            .ok_or_else(|| JobError::NotFound(import_id).into())
    }

    pub fn progress(&self, import_id: &str) -> Option<ImportProgress> {
        self.job(import_id).map(|job| job.progress)
    }

    pub fn result(&self, import_id: &str) -> Option<ImportResult> {
        self.job(import_id).map(|job| job.result)
    }

    pub fn job(&self, import_id: &str) -> Option<ImportJob> {
        match self.jobs.get(import_id) {
            Ok(job) => job,
            Err(err) => {
                warn!("Job lookup for {import_id} failed: {err}");
                None
            }
        }
    }

    pub fn supported_types(&self) -> Vec<SupportedType> {
        supported_types()
    }

    /// Blocks until every submitted job has finished.
    pub fn wait(&self) {
        let handles = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if handle.join().is_err() {
                error!("An import worker panicked");
            }
        }
    }
}

fn execute(
    jobs: &dyn JobStore,
    stores: &dyn StoreFactory,
    config: &ImportConfig,
    job_id: &str,
    file_name: &str,
    options: ImportOptions,
    table: &ParsedTable,
) -> Result<ImportResult, ImportError> {
    let mut store = match stores.open() {
        Ok(store) => store,
        Err(err) => {
            let err = ImportError::from(err);
            let mut result = ImportResult::new(file_name, table.len(), options.dry_run);
            result.record_error(0, &err);
            result.finish();
            fail_job(jobs, job_id, result, &err);
            return Err(err);
        }
    };
    Importer::new(store.as_mut(), config, options).run(jobs, job_id, file_name, table)
}
