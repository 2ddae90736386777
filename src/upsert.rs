use std::collections::BTreeMap;

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    data::Value,
    error::{StoreError, Warning},
    normalize::{TypeFamily, normalize_for_column},
    query::{Insert, Update, key_value},
    record::{FieldSpec, FieldValues, fields},
    resolve::entity::email_taken,
    schema::TargetColumnSet,
    store::{ColumnInfo, Store},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    pub action: UpsertAction,
    pub id: String,
}

/// Column/value pairs bound for one statement.
#[derive(Debug, Clone)]
pub struct Assignments<'a> {
    set: &'a TargetColumnSet,
    values: Vec<(&'a ColumnInfo, Value)>,
}

impl<'a> Assignments<'a> {
    pub fn new(set: &'a TargetColumnSet) -> Self {
        Self {
            set,
            values: Vec::new(),
        }
    }

    pub fn target(&self) -> &'a TargetColumnSet {
        self.set
    }

    pub fn contains(&self, column: &ColumnInfo) -> bool {
        self.values.iter().any(|(c, _)| c.name == column.name)
    }

    /// Binds `value` unless it is null or the column is already bound.
    pub fn assign(&mut self, column: &'a ColumnInfo, value: Value) -> bool {
        if value.is_null() || self.contains(column) {
            return false;
        }
        self.values.push((column, value));
        true
    }

    /// Normalizes `raw` for the first column matching `spec`.
    pub fn assign_field(&mut self, spec: &FieldSpec, raw: &str) -> bool {
        match self.set.first_present(spec.aliases) {
            Some(column) => self.assign(column, normalize_for_column(raw, &column.sql_type)),
            None => false,
        }
    }

    pub fn assign_fields(&mut self, values: &FieldValues) {
        for (spec, raw) in values.iter() {
            self.assign_field(spec, raw);
        }
    }

    /// Binds unknown input columns that happen to exist in the table. Keys,
    /// links, agent columns and timestamps are never taken from input.
    pub fn assign_extra(&mut self, extra: &BTreeMap<String, String>) {
        let pk = self.set.primary_key().map(|c| c.name.clone());
        for (key, raw) in extra {
            let Some(column) = self.set.column(key) else {
                continue;
            };
            let reserved = fields::RESERVED
                .iter()
                .any(|spec| spec.aliases.iter().any(|a| a.eq_ignore_ascii_case(&column.name)));
            if reserved || pk.as_deref() == Some(column.name.as_str()) {
                continue;
            }
            self.assign(column, normalize_for_column(raw, &column.sql_type));
        }
    }

    /// Binds an entity id to the first link column matching `spec`.
    pub fn assign_link(&mut self, spec: &FieldSpec, id: &str) -> bool {
        match self.set.first_present(spec.aliases) {
            Some(column) => self.assign(column, key_value(column, id)),
            None => false,
        }
    }

    pub fn value_of(&self, spec: &FieldSpec) -> Option<&Value> {
        let column = self.set.first_present(spec.aliases)?;
        self.values
            .iter()
            .find(|(c, _)| c.name == column.name)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, spec: &FieldSpec) -> Option<Value> {
        let column = self.set.first_present(spec.aliases)?;
        let idx = self.values.iter().position(|(c, _)| c.name == column.name)?;
        Some(self.values.remove(idx).1)
    }

    /// The column for `spec` when the table requires a value and none is bound.
    pub fn missing_required(&self, spec: &FieldSpec) -> Option<&'a ColumnInfo> {
        self.set
            .first_present(spec.aliases)
            .filter(|column| column.requires_value() && !self.contains(column))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn stamp(&mut self, spec: &FieldSpec) {
        if let Some(column) = self.set.first_present(spec.aliases) {
            let now = Utc::now();
            let value = match TypeFamily::of(&column.sql_type) {
                TypeFamily::Integer | TypeFamily::Real => Value::Integer(now.timestamp()),
                _ => Value::text(now.format("%Y-%m-%d %H:%M:%S").to_string()),
            };
            self.assign(column, value);
        }
    }
}

/// Drops the bound e-mail when it already belongs to another row.
pub fn guard_unique_email(
    store: &mut dyn Store,
    assignments: &mut Assignments<'_>,
    existing: Option<&str>,
    row: usize,
    warnings: &mut Vec<Warning>,
) -> Result<(), StoreError> {
    let set = assignments.target();
    let Some(column) = set.first_present(fields::EMAIL.aliases) else {
        return Ok(());
    };
    let Some(email) = assignments
        .value_of(&fields::EMAIL)
        .and_then(Value::as_reference)
    else {
        return Ok(());
    };
    if email_taken(store, set, column, &email, existing)? {
        let message = format!("e-mail '{email}' already belongs to another record, not saved");
        warn!("Row {row}: {message}");
        warnings.push(Warning::Resolution { row, message });
        assignments.remove(&fields::EMAIL);
    }
    Ok(())
}

/// Updates `existing` with the bound values, or inserts a new row.
pub fn upsert(
    store: &mut dyn Store,
    mut assignments: Assignments<'_>,
    existing: Option<&str>,
) -> Result<Upserted, StoreError> {
    assignments.stamp(&fields::UPDATED_AT);
    match existing {
        Some(id) => update(store, assignments, id),
        None => {
            assignments.stamp(&fields::CREATED_AT);
            insert(store, assignments)
        }
    }
}

fn update(
    store: &mut dyn Store,
    assignments: Assignments<'_>,
    id: &str,
) -> Result<Upserted, StoreError> {
    let set = assignments.target();
    let pk = set
        .primary_key()
        .ok_or_else(|| StoreError::MissingTable(format!("{} (no primary key)", set.table())))?;
    let mut statement = Update::new(set).key(pk, key_value(pk, id));
    for (column, value) in assignments.values {
        statement = statement.set(column, value);
    }
    match statement.build(store.placeholder_style())? {
        Some((sql, params)) => {
            store.execute(&sql, &params)?;
        }
        None => debug!("Nothing to update for {}#{id}", set.table()),
    }
    Ok(Upserted {
        action: UpsertAction::Updated,
        id: id.to_string(),
    })
}

fn insert(store: &mut dyn Store, mut assignments: Assignments<'_>) -> Result<Upserted, StoreError> {
    let set = assignments.target();
    let pk = set.primary_key();
    let generated = match pk {
        Some(pk) if set.key_is_textual() => {
            let id = Uuid::new_v4().to_string();
            assignments.assign(pk, Value::text(id.clone()));
            Some(id)
        }
        _ => None,
    };

    let mut statement = Insert::new(set);
    for (column, value) in assignments.values {
        statement = statement.set(column, value);
    }
    let inserted = |id: String| Upserted {
        action: UpsertAction::Inserted,
        id,
    };

    if let Some(id) = generated {
        let (sql, params) = statement.build(store.placeholder_style())?;
        store.execute(&sql, &params)?;
        return Ok(inserted(id));
    }
    if let Some(pk) = pk
        && store.supports_returning()
    {
        let (sql, params) = statement.returning(pk).build(store.placeholder_style())?;
        let rows = store.query(&sql, &params)?;
        if let Some(id) = rows.first().and_then(|row| row.first()).and_then(Value::as_reference) {
            return Ok(inserted(id));
        }
        return Err(StoreError::MissingGeneratedId(set.table().to_string()));
    }
    let (sql, params) = statement.build(store.placeholder_style())?;
    let outcome = store.execute(&sql, &params)?;
    outcome
        .last_insert_id
        .map(|id| inserted(id.to_string()))
        .ok_or_else(|| StoreError::MissingGeneratedId(set.table().to_string()))
}
