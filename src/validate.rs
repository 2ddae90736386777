use std::sync::OnceLock;

use regex::Regex;

use crate::{
    error::{RowError, Warning},
    record::{ClientFields, ContractFields, FieldSpec, ImportRecord, fields},
};

// Values of odd-position characters; digits share the slot of A..J.
const TAX_CODE_ODD: [u32; 26] = [
    1, 0, 5, 7, 9, 13, 15, 17, 19, 21, 2, 4, 18, 20, 11, 3, 6, 8, 12, 14, 16, 10, 22, 25, 24, 23,
];

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid validation regex"))
}

fn tax_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"^[A-Z]{6}[0-9LMNPQRSTUV]{2}[ABCDEHLMPRST][0-9LMNPQRSTUV]{2}[A-Z][0-9LMNPQRSTUV]{3}[A-Z]$",
    )
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^[^\s@]+@[^\s@]+\.[^\s@]{2,}$")
}

fn pod_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^IT\d{3}E[0-9A-Z]{8}$")
}

fn pdr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\d{14}$")
}

/// Shape and check character of a 16-character codice fiscale.
pub fn is_valid_tax_code(raw: &str) -> bool {
    let code = raw.trim().to_ascii_uppercase();
    if !tax_code_regex().is_match(&code) {
        return false;
    }
    let bytes = code.as_bytes();
    let sum: u32 = bytes[..15]
        .iter()
        .enumerate()
        .map(|(idx, b)| {
            let value = if b.is_ascii_digit() {
                u32::from(b - b'0')
            } else {
                u32::from(b - b'A')
            };
            if idx % 2 == 0 {
                TAX_CODE_ODD[value as usize]
            } else {
                value
            }
        })
        .sum();
    u32::from(bytes[15] - b'A') == sum % 26
}

/// Eleven-digit partita IVA, optional `IT` prefix, check digit verified.
pub fn is_valid_vat_number(raw: &str) -> bool {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("IT")
        .or_else(|| trimmed.strip_prefix("it"))
        .unwrap_or(trimmed);
    if digits.len() != 11 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let values = digits.bytes().map(|b| u32::from(b - b'0')).collect::<Vec<_>>();
    let sum: u32 = values[..10]
        .iter()
        .enumerate()
        .map(|(idx, &d)| {
            if idx % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    (10 - sum % 10) % 10 == values[10]
}

pub fn is_valid_email(raw: &str) -> bool {
    email_regex().is_match(raw.trim())
}

pub fn looks_like_pod(raw: &str) -> bool {
    pod_regex().is_match(&raw.trim().to_ascii_uppercase())
}

pub fn looks_like_pdr(raw: &str) -> bool {
    pdr_regex().is_match(raw.trim())
}

/// Checks a typed record in place.
///
/// Bad tax codes and VAT ids reject the row. Malformed e-mail addresses are
/// dropped with a warning; odd POD/PDR shapes only warn.
pub fn validate_record(
    record: &mut ImportRecord,
    row: usize,
    warnings: &mut Vec<Warning>,
) -> Result<(), RowError> {
    match record {
        ImportRecord::PrivateClient(r) | ImportRecord::CompanyClient(r) => {
            validate_client(&mut r.client, row, warnings)
        }
        ImportRecord::ElectricityContract(r) => {
            validate_client(&mut r.owner, row, warnings)?;
            check_supply_point(&r.contract, &fields::POD, looks_like_pod, row, warnings);
            Ok(())
        }
        ImportRecord::GasContract(r) => {
            validate_client(&mut r.owner, row, warnings)?;
            check_supply_point(&r.contract, &fields::PDR, looks_like_pdr, row, warnings);
            Ok(())
        }
    }
}

fn validate_client(
    client: &mut ClientFields,
    row: usize,
    warnings: &mut Vec<Warning>,
) -> Result<(), RowError> {
    if let Some(code) = client.tax_code()
        && !is_valid_tax_code(code)
    {
        return Err(RowError::Validation(format!("invalid tax code '{code}'")));
    }
    if let Some(vat) = client.vat_number()
        && !is_valid_vat_number(vat)
    {
        return Err(RowError::Validation(format!("invalid VAT number '{vat}'")));
    }
    for spec in [&fields::EMAIL, &fields::PEC] {
        if let Some(email) = client.values.get(spec)
            && !is_valid_email(email)
        {
            warnings.push(Warning::Validation {
                row,
                message: format!("malformed e-mail '{email}' ignored"),
            });
            client.values.remove(spec);
        }
    }
    Ok(())
}

fn check_supply_point(
    contract: &ContractFields,
    spec: &FieldSpec,
    check: fn(&str) -> bool,
    row: usize,
    warnings: &mut Vec<Warning>,
) {
    if let Some(code) = contract.values.get(spec)
        && !check(code)
    {
        warnings.push(Warning::Validation {
            row,
            message: format!("{} '{code}' has an unexpected format", spec.key.to_uppercase()),
        });
    }
}
