use log::trace;

use crate::{
    data::Value,
    error::StoreError,
    query::{Match, Select, key_value},
    record::{ClientFields, ContractFields, FieldSpec, fields},
    schema::TargetColumnSet,
    store::{ColumnInfo, Store},
};

/// Key of the first row where `column op value`, if any.
fn lookup(
    store: &mut dyn Store,
    set: &TargetColumnSet,
    spec: &FieldSpec,
    op: Match,
    value: &str,
    scope: Option<(&FieldSpec, &str)>,
) -> Result<Option<String>, StoreError> {
    let (Some(pk), Some(column)) = (set.primary_key(), set.first_present(spec.aliases)) else {
        return Ok(None);
    };
    let mut select = Select::new(set).column(pk).filter(column, op, value);
    if let Some((scope_spec, scope_id)) = scope
        && let Some(scope_column) = set.first_present(scope_spec.aliases)
    {
        select = select.filter(scope_column, Match::Exact, key_value(scope_column, scope_id));
    }
    let (sql, params) = select.limit(1).build(store.placeholder_style())?;
    trace!("lookup: {sql}");
    let rows = store.query(&sql, &params)?;
    Ok(rows.first().and_then(|row| row.first()).and_then(Value::as_reference))
}

/// True when a row with primary key `id` exists.
pub fn exists(store: &mut dyn Store, set: &TargetColumnSet, id: &str) -> Result<bool, StoreError> {
    let Some(pk) = set.primary_key() else {
        return Ok(false);
    };
    let (sql, params) = Select::new(set)
        .column(pk)
        .filter(pk, Match::Exact, key_value(pk, id))
        .limit(1)
        .build(store.placeholder_style())?;
    Ok(!store.query(&sql, &params)?.is_empty())
}

/// Finds a client by tax code, VAT id or company name (case-insensitive),
/// then by lower-cased e-mail.
pub fn find_client(
    store: &mut dyn Store,
    set: &TargetColumnSet,
    client: &ClientFields,
) -> Result<Option<String>, StoreError> {
    let keys = [
        (&fields::TAX_CODE, client.tax_code()),
        (&fields::VAT_NUMBER, client.vat_number()),
        (&fields::COMPANY_NAME, client.company_name()),
    ];
    for (spec, value) in keys {
        if let Some(value) = value
            && let Some(id) = lookup(store, set, spec, Match::UpperTrim, value, None)?
        {
            return Ok(Some(id));
        }
    }
    match client.email() {
        Some(email) => lookup(store, set, &fields::EMAIL, Match::LowerTrim, email, None),
        None => Ok(None),
    }
}

/// Finds a contract by number, then by supply point (POD or PDR) scoped to
/// `client_id` when the table links contracts to clients.
pub fn find_contract(
    store: &mut dyn Store,
    set: &TargetColumnSet,
    contract: &ContractFields,
    supply_point: &FieldSpec,
    client_id: Option<&str>,
) -> Result<Option<String>, StoreError> {
    if let Some(number) = contract.contract_number()
        && let Some(id) = lookup(store, set, &fields::CONTRACT_NUMBER, Match::Exact, number, None)?
    {
        return Ok(Some(id));
    }
    match contract.values.get(supply_point) {
        Some(code) => lookup(
            store,
            set,
            supply_point,
            Match::UpperTrim,
            code,
            client_id.map(|id| (&fields::CLIENT_LINK, id)),
        ),
        None => Ok(None),
    }
}

/// True when `email` already belongs to a row other than `except`.
pub fn email_taken(
    store: &mut dyn Store,
    set: &TargetColumnSet,
    email_column: &ColumnInfo,
    email: &str,
    except: Option<&str>,
) -> Result<bool, StoreError> {
    let Some(pk) = set.primary_key() else {
        return Ok(false);
    };
    let mut select = Select::new(set)
        .column(pk)
        .filter(email_column, Match::LowerTrim, email);
    if let Some(id) = except {
        select = select.filter(pk, Match::NotEqual, key_value(pk, id));
    }
    let (sql, params) = select.limit(1).build(store.placeholder_style())?;
    Ok(!store.query(&sql, &params)?.is_empty())
}
