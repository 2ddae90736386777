use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{parser::RawRecord, record::fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    ClientPrivate,
    ClientCompany,
    ContractElectricity,
    ContractGas,
    Unknown,
}

impl RecordKind {
    pub const SUPPORTED: [RecordKind; 4] = [
        RecordKind::ClientPrivate,
        RecordKind::ClientCompany,
        RecordKind::ContractElectricity,
        RecordKind::ContractGas,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::ClientPrivate => "client_private",
            RecordKind::ClientCompany => "client_company",
            RecordKind::ContractElectricity => "contract_electricity",
            RecordKind::ContractGas => "contract_gas",
            RecordKind::Unknown => "unknown",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RecordKind::ClientPrivate => "Private client",
            RecordKind::ClientCompany => "Company client",
            RecordKind::ContractElectricity => "Electricity contract",
            RecordKind::ContractGas => "Gas contract",
            RecordKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hint substrings, contract kinds first.
const HINTS: &[(&str, RecordKind)] = &[
    ("luce", RecordKind::ContractElectricity),
    ("elettric", RecordKind::ContractElectricity),
    ("gas", RecordKind::ContractGas),
    ("aziend", RecordKind::ClientCompany),
    ("company", RecordKind::ClientCompany),
    ("business", RecordKind::ClientCompany),
    ("privat", RecordKind::ClientPrivate),
];

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    auto_detect: bool,
}

impl Classifier {
    pub fn new(auto_detect: bool) -> Self {
        Self { auto_detect }
    }

    pub fn classify(&self, record: &RawRecord) -> RecordKind {
        if let Some(kind) = classify_hint(record) {
            return kind;
        }
        if self.auto_detect {
            infer_kind(record)
        } else {
            RecordKind::Unknown
        }
    }
}

fn classify_hint(record: &RawRecord) -> Option<RecordKind> {
    let (_, hint) = record.first_of(fields::TYPE_HINT.aliases)?;
    let lowered = hint.to_lowercase();
    HINTS
        .iter()
        .find(|(token, _)| lowered.contains(token))
        .map(|(_, kind)| *kind)
}

fn infer_kind(record: &RawRecord) -> RecordKind {
    if record.has_any(fields::POD.aliases) {
        RecordKind::ContractElectricity
    } else if record.has_any(fields::PDR.aliases) {
        RecordKind::ContractGas
    } else if (record.has_any(fields::VAT_NUMBER.aliases)
        || record.has_any(fields::COMPANY_NAME.aliases))
        && !record.has_any(fields::TAX_CODE.aliases)
    {
        RecordKind::ClientCompany
    } else if record.has_any(fields::TAX_CODE.aliases) || record.has_any(fields::EMAIL.aliases) {
        RecordKind::ClientPrivate
    } else {
        RecordKind::Unknown
    }
}
