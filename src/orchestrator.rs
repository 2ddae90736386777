use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::{
    classify::{Classifier, RecordKind},
    config::{ImportConfig, TargetTables},
    data::Value,
    error::{ImportError, RowError, StoreError, Warning},
    fallback::{fill_required_contract_columns, infer_supply_point},
    job::{
        ImportOptions, ImportResult, ImportStage, JobStore, OwnerOutcome, RowOutcome,
        processing_progress,
    },
    parser::{ParsedTable, RawRecord, parse_with_delimiter},
    record::{AgentRef, ClientFields, ContractRecord, FieldSpec, ImportRecord, fields},
    resolve::{AgentDirectory, exists, find_client, find_contract, is_usable_reference},
    schema::TargetColumnSet,
    store::Store,
    upsert::{Assignments, Upserted, guard_unique_email, upsert},
    validate::validate_record,
};

/// Column sets of the four target tables, introspected once per job.
#[derive(Debug, Default)]
struct Targets {
    tables: Vec<(RecordKind, String, Option<TargetColumnSet>)>,
}

impl Targets {
    fn introspect(
        store: &mut dyn Store,
        tables: &TargetTables,
        warnings: &mut Vec<Warning>,
    ) -> Result<Self, StoreError> {
        let mut targets = Vec::with_capacity(RecordKind::SUPPORTED.len());
        for kind in RecordKind::SUPPORTED {
            let Some(table) = tables.for_kind(kind) else {
                continue;
            };
            let set = TargetColumnSet::introspect(store, table)?;
            if set.is_none() {
                warnings.push(Warning::Schema {
                    message: format!("table '{table}' not found; {} rows cannot be stored", kind.label()),
                });
            }
            targets.push((kind, table.to_string(), set));
        }
        Ok(Self { tables: targets })
    }

    fn get(&self, kind: RecordKind) -> Result<&TargetColumnSet, RowError> {
        match self.tables.iter().find(|(k, _, _)| *k == kind) {
            Some((_, _, Some(set))) => Ok(set),
            Some((_, table, None)) => Err(StoreError::MissingTable(table.clone()).into()),
            None => Err(StoreError::MissingTable(kind.to_string()).into()),
        }
    }

    fn find(&self, kind: RecordKind) -> Option<&TargetColumnSet> {
        self.get(kind).ok()
    }
}

/// Per-job state shared by every row.
struct JobContext {
    targets: Targets,
    agents: Option<AgentDirectory>,
}

fn client_type_label(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::ClientCompany => "azienda",
        _ => "privato",
    }
}

/// Runs one job inside a single transaction with a savepoint per row. The
/// batch commits after every row has been attempted, unless it is a dry run.
pub struct Importer<'a> {
    store: &'a mut dyn Store,
    config: &'a ImportConfig,
    options: ImportOptions,
    classifier: Classifier,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a mut dyn Store, config: &'a ImportConfig, options: ImportOptions) -> Self {
        let options = options.with_batch_size(options.batch_size as i64);
        Self {
            store,
            config,
            options,
            classifier: Classifier::new(options.auto_detect_type),
        }
    }

    /// Processes `table` as job `job_id`, publishing progress and result
    /// snapshots to `jobs`. Returns the final result when the job completes.
    pub fn run(
        &mut self,
        jobs: &dyn JobStore,
        job_id: &str,
        file_name: &str,
        table: &ParsedTable,
    ) -> Result<ImportResult, ImportError> {
        let total = table.len();
        info!(
            "Importing {total} record(s) from '{file_name}'{}",
            if self.options.dry_run { " (dry run)" } else { "" }
        );
        jobs.update(job_id, &mut |job| {
            job.result.total_rows = total;
            job.progress.advance(
                ImportStage::Processing,
                processing_progress(0, total),
                format!("Processing {total} record(s)"),
            );
        })?;

        let mut result = ImportResult::new(file_name, total, self.options.dry_run);
        let mut publish = |snapshot: &ImportResult| {
            let progress = processing_progress(snapshot.processed, total);
            let message = format!("Processed {}/{total} record(s)", snapshot.processed);
            if let Err(err) = jobs.update(job_id, &mut |job| {
                job.result = snapshot.clone();
                job.progress.advance(ImportStage::Processing, progress, message.clone());
            }) {
                warn!("Could not publish progress for job {job_id}: {err}");
            }
        };

        match self.process(table, &mut result, &mut publish) {
            Ok(()) => {
                result.finish();
                let message = format!(
                    "Completed: {} inserted, {} updated, {} error(s)",
                    result.inserted.total(),
                    result.updated.total(),
                    result.errors.len()
                );
                info!("{message}");
                jobs.update(job_id, &mut |job| {
                    job.result = result.clone();
                    job.progress.advance(ImportStage::Completed, 100, message.clone());
                })?;
                Ok(result)
            }
            Err(err) => {
                let err = ImportError::from(err);
                warn!("Import of '{file_name}' failed: {err}");
                result.record_error(0, &err);
                result.finish();
                fail_job(jobs, job_id, result, &err);
                Err(err)
            }
        }
    }

    fn process(
        &mut self,
        table: &ParsedTable,
        result: &mut ImportResult,
        publish: &mut dyn FnMut(&ImportResult),
    ) -> Result<(), StoreError> {
        self.store.begin()?;
        match self.process_rows(table, result, publish) {
            Ok(()) if self.options.dry_run => {
                self.store.rollback()?;
                info!("Dry run: all changes rolled back");
                Ok(())
            }
            Ok(()) => self.store.commit(),
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback() {
                    warn!("Rollback after failure also failed: {rollback_err}");
                }
                Err(err)
            }
        }
    }

    fn process_rows(
        &mut self,
        table: &ParsedTable,
        result: &mut ImportResult,
        publish: &mut dyn FnMut(&ImportResult),
    ) -> Result<(), StoreError> {
        let mut warnings = Vec::new();
        let targets = Targets::introspect(self.store, &self.config.tables, &mut warnings)?;
        let agents = if self.options.skip_association {
            None
        } else {
            let users = &self.config.tables.users;
            let directory = AgentDirectory::load(self.store, users)?;
            if directory.is_none() {
                warnings.push(Warning::Schema {
                    message: format!("table '{users}' not found; agent references ignored"),
                });
            }
            directory
        };
        result
            .warnings
            .extend(warnings.iter().map(ToString::to_string));
        let ctx = JobContext { targets, agents };

        for (idx, raw) in table.records.iter().enumerate() {
            let row = idx + 1;
            let savepoint = format!("row_{row}");
            let mut row_warnings = Vec::new();
            self.store.savepoint(&savepoint)?;
            match self.process_row(&ctx, row, raw, &mut row_warnings) {
                Ok(outcome) => {
                    self.store.release(&savepoint)?;
                    if let Some(outcome) = outcome {
                        debug!("Row {row}: {:?} {} {}", outcome.action, outcome.kind, outcome.id);
                        result.record_outcome(outcome);
                    }
                }
                Err(err) => {
                    self.store.rollback_to(&savepoint)?;
                    warn!("Row {row}: {err}");
                    result.record_error(row, &err);
                }
            }
            result
                .warnings
                .extend(row_warnings.iter().map(ToString::to_string));
            result.processed += 1;
            if result.processed % self.options.batch_size == 0 {
                publish(result);
            }
        }
        Ok(())
    }

    fn process_row(
        &mut self,
        ctx: &JobContext,
        row: usize,
        raw: &RawRecord,
        warnings: &mut Vec<Warning>,
    ) -> Result<Option<RowOutcome>, RowError> {
        let kind = self.classifier.classify(raw);
        let Some(mut record) = ImportRecord::from_raw(kind, raw) else {
            warn!("Row {row}: record type could not be determined");
            warnings.push(Warning::Classification { row });
            return Ok(None);
        };
        if !self.options.skip_validation {
            validate_record(&mut record, row, warnings)?;
        }
        let outcome = match record {
            ImportRecord::PrivateClient(client) | ImportRecord::CompanyClient(client) => {
                let set = ctx.targets.get(kind)?;
                let existing = find_client(self.store, set, &client.client)?;
                let agent = self.agent_for(ctx, &client.agent, row, warnings);
                let upserted = self.upsert_client(
                    set,
                    kind,
                    &client.client,
                    &client.extra,
                    agent.as_deref(),
                    existing.as_deref(),
                    row,
                    warnings,
                )?;
                RowOutcome {
                    row,
                    kind,
                    action: upserted.action,
                    id: upserted.id,
                    owner: None,
                }
            }
            ImportRecord::ElectricityContract(contract) => {
                self.import_contract(ctx, kind, contract, &fields::POD, row, warnings)?
            }
            ImportRecord::GasContract(contract) => {
                self.import_contract(ctx, kind, contract, &fields::PDR, row, warnings)?
            }
        };
        Ok(Some(outcome))
    }

    fn agent_for(
        &self,
        ctx: &JobContext,
        agent: &AgentRef,
        row: usize,
        warnings: &mut Vec<Warning>,
    ) -> Option<String> {
        if self.options.skip_association || agent.is_empty() {
            return None;
        }
        ctx.agents
            .as_ref()
            .and_then(|directory| directory.resolve(agent, row, warnings))
    }

    #[allow(clippy::too_many_arguments)]
    fn upsert_client(
        &mut self,
        set: &TargetColumnSet,
        kind: RecordKind,
        client: &ClientFields,
        extra: &BTreeMap<String, String>,
        agent: Option<&str>,
        existing: Option<&str>,
        row: usize,
        warnings: &mut Vec<Warning>,
    ) -> Result<Upserted, StoreError> {
        let mut assignments = Assignments::new(set);
        assignments.assign_fields(&client.values);
        assignments.assign_extra(extra);
        if let Some(agent) = agent {
            assignments.assign_link(&fields::AGENT_LINK, agent);
        }
        if existing.is_none()
            && let Some(column) = set.first_present(fields::CLIENT_TYPE.aliases)
        {
            assignments.assign(column, Value::text(client_type_label(kind)));
        }
        guard_unique_email(self.store, &mut assignments, existing, row, warnings)?;
        upsert(self.store, assignments, existing)
    }

    fn import_contract(
        &mut self,
        ctx: &JobContext,
        kind: RecordKind,
        mut contract: ContractRecord,
        supply_point: &'static FieldSpec,
        row: usize,
        warnings: &mut Vec<Warning>,
    ) -> Result<RowOutcome, RowError> {
        let set = ctx.targets.get(kind)?;
        infer_supply_point(&mut contract.contract, supply_point, row, warnings);
        let agent = self.agent_for(ctx, &contract.agent, row, warnings);
        let (client_id, owner) = self.resolve_owner(ctx, &contract, agent.as_deref(), row, warnings)?;
        if !is_usable_reference(&client_id) {
            return Err(RowError::Association(format!(
                "client resolved to unusable id '{client_id}'"
            )));
        }

        let existing =
            find_contract(self.store, set, &contract.contract, supply_point, Some(client_id.as_str()))?;
        let mut assignments = Assignments::new(set);
        assignments.assign_fields(&contract.contract.values);
        assignments.assign_extra(&contract.extra);
        assignments.assign_link(&fields::CLIENT_LINK, &client_id);
        if let Some(agent) = agent.as_deref() {
            assignments.assign_link(&fields::AGENT_LINK, agent);
        }
        if existing.is_none() {
            fill_required_contract_columns(
                &mut assignments,
                &contract.contract,
                supply_point,
                &self.config.unspecified_supplier,
                row,
                warnings,
            );
        }
        let upserted = upsert(self.store, assignments, existing.as_deref())?;
        Ok(RowOutcome {
            row,
            kind,
            action: upserted.action,
            id: upserted.id,
            owner,
        })
    }

    /// Finds the contract's client by explicit reference, then by the inline
    /// client columns, creating it from those columns as a last resort. The
    /// new client goes to the first client table holding any of its columns.
    fn resolve_owner(
        &mut self,
        ctx: &JobContext,
        contract: &ContractRecord,
        agent: Option<&str>,
        row: usize,
        warnings: &mut Vec<Warning>,
    ) -> Result<(String, Option<OwnerOutcome>), RowError> {
        let owner = &contract.owner;
        let order = if owner.looks_like_company() {
            [RecordKind::ClientCompany, RecordKind::ClientPrivate]
        } else {
            [RecordKind::ClientPrivate, RecordKind::ClientCompany]
        };

        if let Some(reference) = contract.owner_ref.as_deref() {
            if !is_usable_reference(reference) {
                return Err(RowError::Association(format!(
                    "client reference '{reference}' is not a valid id"
                )));
            }
            for kind in order {
                if let Some(set) = ctx.targets.find(kind)
                    && exists(self.store, set, reference)?
                {
                    return Ok((reference.trim().to_string(), None));
                }
            }
            if owner.values.is_empty() {
                return Err(RowError::Association(format!(
                    "client '{reference}' not found"
                )));
            }
            warnings.push(Warning::Resolution {
                row,
                message: format!("client '{reference}' not found, matching on client columns"),
            });
        }

        if owner.values.is_empty() {
            return Err(RowError::Association(
                "contract row does not identify a client".to_string(),
            ));
        }
        for kind in order {
            if let Some(set) = ctx.targets.find(kind)
                && let Some(id) = find_client(self.store, set, owner)?
            {
                return Ok((id, None));
            }
        }
        if !owner.can_create() {
            return Err(RowError::Association(format!(
                "no client matches '{}'",
                owner.describe()
            )));
        }

        let kind = order
            .into_iter()
            .find(|kind| {
                ctx.targets.find(*kind).is_some_and(|set| {
                    owner
                        .values
                        .iter()
                        .any(|(spec, _)| set.first_present(spec.aliases).is_some())
                })
            })
            .unwrap_or(order[0]);
        let set = ctx.targets.get(kind)?;
        let upserted =
            self.upsert_client(set, kind, owner, &BTreeMap::new(), agent, None, row, warnings)?;
        info!("Row {row}: created {} {} for contract", kind.label(), upserted.id);
        Ok((
            upserted.id.clone(),
            Some(OwnerOutcome {
                kind,
                action: upserted.action,
                id: upserted.id,
            }),
        ))
    }
}

/// Moves job `job_id` to `parsing`, parses the upload and, on failure, marks
/// the job failed.
pub fn parse_upload(
    jobs: &dyn JobStore,
    job_id: &str,
    file_name: &str,
    bytes: &[u8],
    delimiter: Option<u8>,
) -> Result<ParsedTable, ImportError> {
    jobs.update(job_id, &mut |job| {
        job.progress
            .advance(ImportStage::Parsing, 5, format!("Parsing '{file_name}'"));
    })?;
    match parse_with_delimiter(bytes, file_name, delimiter) {
        Ok(table) => {
            let total = table.len();
            jobs.update(job_id, &mut |job| job.result.total_rows = total)?;
            Ok(table)
        }
        Err(err) => {
            let err = ImportError::from(err);
            warn!("Could not parse '{file_name}': {err}");
            let mut result = ImportResult::new(file_name, 0, false);
            result.record_error(0, &err);
            result.finish();
            fail_job(jobs, job_id, result, &err);
            Err(err)
        }
    }
}

pub(crate) fn fail_job(jobs: &dyn JobStore, job_id: &str, mut result: ImportResult, err: &ImportError) {
    let message = format!("Failed: {err}");
    if let Err(job_err) = jobs.update(job_id, &mut |job| {
        result.dry_run = job.options.dry_run;
        job.result = result.clone();
        job.progress.advance(ImportStage::Failed, 100, message.clone());
    }) {
        warn!("Could not mark job {job_id} as failed: {job_err}");
    }
}
