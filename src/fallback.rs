use chrono::Utc;
use log::warn;
use uuid::Uuid;

use crate::{
    data::Value,
    error::Warning,
    normalize::TypeFamily,
    record::{ContractFields, FieldSpec, fields},
    upsert::Assignments,
    validate::{looks_like_pdr, looks_like_pod},
};

fn report(row: usize, message: String, warnings: &mut Vec<Warning>) {
    warn!("Row {row}: {message}");
    warnings.push(Warning::Fallback { row, message });
}

fn supply_point_shape(spec: &FieldSpec) -> fn(&str) -> bool {
    if spec.key == fields::PDR.key {
        looks_like_pdr
    } else {
        looks_like_pod
    }
}

/// Copies the contract number into the supply-point field when the row has
/// no POD/PDR and the number has the supply-point shape.
pub fn infer_supply_point(
    contract: &mut ContractFields,
    supply_point: &'static FieldSpec,
    row: usize,
    warnings: &mut Vec<Warning>,
) {
    if contract.values.get(supply_point).is_some() {
        return;
    }
    let Some(number) = contract.contract_number().map(str::to_string) else {
        return;
    };
    if supply_point_shape(supply_point)(&number) {
        let code = number.trim().to_ascii_uppercase();
        report(
            row,
            format!(
                "{} inferred from contract number '{number}'",
                supply_point.key.to_uppercase()
            ),
            warnings,
        );
        contract.values.set(supply_point, code);
    }
}

/// Binds defaults for mandatory contract columns the row left empty.
pub fn fill_required_contract_columns(
    assignments: &mut Assignments<'_>,
    contract: &ContractFields,
    supply_point: &FieldSpec,
    unspecified_supplier: &str,
    row: usize,
    warnings: &mut Vec<Warning>,
) {
    if let Some(column) = assignments.missing_required(&fields::CONTRACT_NUMBER) {
        let number = match contract.values.get(supply_point) {
            Some(code) => format!("CTR-{}", code.trim().to_ascii_uppercase()),
            None => {
                let uuid = Uuid::new_v4().simple().to_string();
                format!("CTR-{}", &uuid[..8].to_ascii_uppercase())
            }
        };
        report(row, format!("missing contract number, generated '{number}'"), warnings);
        assignments.assign(column, Value::text(number));
    }

    if let Some(column) = assignments.missing_required(&fields::SUPPLIER) {
        report(
            row,
            format!("missing supplier, set to '{unspecified_supplier}'"),
            warnings,
        );
        assignments.assign(column, Value::text(unspecified_supplier));
    }

    if let Some(column) = assignments.missing_required(&fields::EXPIRY_DATE) {
        let (value, source) = match assignments.value_of(&fields::ACTIVATION_DATE) {
            Some(activation) => (activation.clone(), "activation date"),
            None => (
                Value::text(Utc::now().date_naive().format("%Y-%m-%d").to_string()),
                "today",
            ),
        };
        report(
            row,
            format!("missing expiry date, set to {source} ({value})"),
            warnings,
        );
        assignments.assign(column, value);
    }

    if let Some(column) = assignments.missing_required(&fields::PRICE) {
        let zero = match TypeFamily::of(&column.sql_type) {
            TypeFamily::Integer => Value::Integer(0),
            TypeFamily::Text => Value::text("0"),
            _ => Value::Real(0.0),
        };
        report(row, "missing price, set to 0".to_string(), warnings);
        assignments.assign(column, zero);
    }
}
