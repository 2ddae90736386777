use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{classify::RecordKind, job::ImportOptions};

pub const DEFAULT_UNSPECIFIED_SUPPLIER: &str = "unspecified";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetTables {
    pub private_clients: String,
    pub company_clients: String,
    pub electricity_contracts: String,
    pub gas_contracts: String,
    pub users: String,
}

impl Default for TargetTables {
    fn default() -> Self {
        Self {
            private_clients: "clienti_privati".to_string(),
            company_clients: "clienti_aziende".to_string(),
            electricity_contracts: "contratti_luce".to_string(),
            gas_contracts: "contratti_gas".to_string(),
            users: "users".to_string(),
        }
    }
}

impl TargetTables {
    pub fn for_kind(&self, kind: RecordKind) -> Option<&str> {
        match kind {
            RecordKind::ClientPrivate => Some(&self.private_clients),
            RecordKind::ClientCompany => Some(&self.company_clients),
            RecordKind::ContractElectricity => Some(&self.electricity_contracts),
            RecordKind::ContractGas => Some(&self.gas_contracts),
            RecordKind::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub tables: TargetTables,
    /// Supplier written when a contract row has none and the column is mandatory.
    pub unspecified_supplier: String,
    pub options: ImportOptions,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            tables: TargetTables::default(),
            unspecified_supplier: DEFAULT_UNSPECIFIED_SUPPLIER.to_string(),
            options: ImportOptions::default(),
        }
    }
}

impl ImportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config: ImportConfig =
            serde_yaml::from_reader(reader).context("Parsing import config YAML")?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Parsing import config YAML")
    }
}
