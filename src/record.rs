use std::collections::{BTreeMap, BTreeSet};

use crate::{classify::RecordKind, parser::RawRecord};

/// A logical field and the header/column spellings that carry it.
#[derive(Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub aliases: &'static [&'static str],
}

pub mod fields {
    use super::FieldSpec;

    macro_rules! field {
        ($name:ident, $key:literal, [$($alias:literal),+ $(,)?]) => {
            pub const $name: FieldSpec = FieldSpec {
                key: $key,
                aliases: &[$($alias),+],
            };
        };
    }

    // Client identity and contact data.
    field!(FIRST_NAME, "first_name", ["nome", "first_name"]);
    field!(LAST_NAME, "last_name", ["cognome", "last_name"]);
    field!(TAX_CODE, "tax_code", ["codice_fiscale", "cf", "tax_code"]);
    field!(VAT_NUMBER, "vat_number", ["partita_iva", "piva", "p_iva", "vat_number"]);
    field!(COMPANY_NAME, "company_name", ["ragione_sociale", "denominazione", "company_name"]);
    field!(EMAIL, "email", ["email_principale", "email"]);
    field!(PEC, "pec", ["pec", "email_pec"]);
    field!(PHONE, "phone", ["telefono", "cellulare", "phone", "mobile"]);
    field!(ADDRESS, "address", ["indirizzo", "address"]);
    field!(CITY, "city", ["citta", "comune", "city"]);
    field!(ZIP, "zip", ["cap", "zip", "postal_code"]);
    field!(PROVINCE, "province", ["provincia", "province"]);
    field!(BIRTH_DATE, "birth_date", ["data_nascita", "birth_date"]);
    field!(NOTES, "notes", ["note", "notes"]);

    // Contract data.
    field!(CONTRACT_NUMBER, "contract_number", ["numero_contratto", "codice_contratto", "contract_number", "n_contratto"]);
    field!(POD, "pod", ["pod", "codice_pod"]);
    field!(PDR, "pdr", ["pdr", "codice_pdr"]);
    field!(SUPPLIER, "supplier", ["fornitore", "supplier", "gestore"]);
    field!(OFFER, "offer", ["offerta", "nome_offerta", "offer"]);
    field!(ACTIVATION_DATE, "activation_date", ["data_attivazione", "data_inizio", "activation_date", "start_date"]);
    field!(EXPIRY_DATE, "expiry_date", ["data_scadenza", "data_fine", "expiry_date", "end_date"]);
    field!(PRICE, "price", ["prezzo", "prezzo_energia", "price"]);
    field!(ANNUAL_CONSUMPTION, "annual_consumption", ["consumo_annuo", "annual_consumption"]);
    field!(POWER, "power", ["potenza", "potenza_impegnata", "power_kw"]);
    field!(STATUS, "status", ["stato", "status"]);
    field!(SUPPLY_ADDRESS, "supply_address", ["indirizzo_fornitura", "supply_address"]);

    // Control fields: read, never written as-is.
    field!(TYPE_HINT, "type_hint", ["tipo_record", "tipo", "tipologia", "record_type", "type"]);
    field!(CLIENT_REF, "client_ref", ["cliente_id", "id_cliente", "client_id"]);
    field!(AGENT_FULL_NAME, "agent_full_name", ["agente_nome_completo", "agente_full_name", "agente_nome", "nome_agente"]);
    field!(AGENT_ID, "agent_id", ["agente_id", "id_agente", "agent_id", "agente"]);
    field!(AGENT_EMAIL, "agent_email", ["agente_email", "email_agente", "agent_email"]);
    field!(AGENT_FIRST_NAME, "agent_first_name", ["agente_nome", "agent_first_name"]);
    field!(AGENT_LAST_NAME, "agent_last_name", ["agente_cognome", "agent_last_name"]);

    // Target-only columns.
    field!(CLIENT_LINK, "client_link", ["cliente_id", "client_id", "id_cliente"]);
    field!(CLIENT_TYPE, "client_type", ["tipo_cliente", "client_type"]);
    field!(AGENT_LINK, "agent_link", ["agente_id", "agent_id", "id_agente", "user_id"]);
    field!(CREATED_AT, "created_at", ["created_at", "data_creazione"]);
    field!(UPDATED_AT, "updated_at", ["updated_at", "data_modifica"]);

    pub const CLIENT: &[&FieldSpec] = &[
        &FIRST_NAME, &LAST_NAME, &TAX_CODE, &VAT_NUMBER, &COMPANY_NAME, &EMAIL, &PEC, &PHONE,
        &ADDRESS, &CITY, &ZIP, &PROVINCE, &BIRTH_DATE, &NOTES,
    ];

    /// Owner columns a contract row may carry inline.
    pub const INLINE_CLIENT: &[&FieldSpec] = &[
        &FIRST_NAME, &LAST_NAME, &TAX_CODE, &VAT_NUMBER, &COMPANY_NAME, &EMAIL, &PEC, &PHONE,
    ];

    pub const CONTRACT: &[&FieldSpec] = &[
        &CONTRACT_NUMBER, &POD, &PDR, &SUPPLIER, &OFFER, &ACTIVATION_DATE, &EXPIRY_DATE, &PRICE,
        &ANNUAL_CONSUMPTION, &POWER, &STATUS, &SUPPLY_ADDRESS, &NOTES,
    ];

    pub const CONTROL: &[&FieldSpec] = &[
        &TYPE_HINT, &CLIENT_REF, &AGENT_FULL_NAME, &AGENT_ID, &AGENT_EMAIL, &AGENT_FIRST_NAME,
        &AGENT_LAST_NAME,
    ];

    /// Columns importers manage themselves and never fill from `extra`.
    pub const RESERVED: &[&FieldSpec] = &[&CLIENT_LINK, &CLIENT_TYPE, &AGENT_LINK, &CREATED_AT, &UPDATED_AT];
}

/// Field values keyed by field, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValues {
    values: Vec<(&'static FieldSpec, String)>,
}

impl FieldValues {
    fn read(raw: &RawRecord, specs: &[&'static FieldSpec]) -> Self {
        let values = specs
            .iter()
            .filter_map(|spec| {
                raw.first_of(spec.aliases)
                    .map(|(_, value)| (*spec, value.to_string()))
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, spec: &FieldSpec) -> Option<&str> {
        self.values
            .iter()
            .find(|(s, _)| s.key == spec.key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, spec: &'static FieldSpec, value: impl Into<String>) {
        let value = value.into();
        match self.values.iter_mut().find(|(s, _)| s.key == spec.key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((spec, value)),
        }
    }

    pub fn remove(&mut self, spec: &FieldSpec) -> Option<String> {
        let idx = self.values.iter().position(|(s, _)| s.key == spec.key)?;
        Some(self.values.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static FieldSpec, &str)> {
        self.values.iter().map(|(spec, value)| (*spec, value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Client fields shared by client rows and inline contract owners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientFields {
    pub values: FieldValues,
}

impl ClientFields {
    pub fn tax_code(&self) -> Option<&str> {
        self.values.get(&fields::TAX_CODE)
    }

    pub fn vat_number(&self) -> Option<&str> {
        self.values.get(&fields::VAT_NUMBER)
    }

    pub fn company_name(&self) -> Option<&str> {
        self.values.get(&fields::COMPANY_NAME)
    }

    pub fn email(&self) -> Option<&str> {
        self.values.get(&fields::EMAIL)
    }

    pub fn first_name(&self) -> Option<&str> {
        self.values.get(&fields::FIRST_NAME)
    }

    pub fn last_name(&self) -> Option<&str> {
        self.values.get(&fields::LAST_NAME)
    }

    pub fn looks_like_company(&self) -> bool {
        self.vat_number().is_some() || self.company_name().is_some()
    }

    /// Enough data to create the client when nothing matches.
    pub fn can_create(&self) -> bool {
        self.tax_code().is_some()
            || self.looks_like_company()
            || (self.first_name().is_some() && self.last_name().is_some())
    }

    pub fn describe(&self) -> String {
        self.tax_code()
            .or(self.vat_number())
            .or(self.email())
            .or(self.company_name())
            .map(str::to_string)
            .unwrap_or_else(|| {
                [self.first_name(), self.last_name()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
    }
}

/// Contract data for either commodity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractFields {
    pub values: FieldValues,
}

impl ContractFields {
    pub fn contract_number(&self) -> Option<&str> {
        self.values.get(&fields::CONTRACT_NUMBER)
    }

    pub fn pod(&self) -> Option<&str> {
        self.values.get(&fields::POD)
    }
}

/// Every way a row may point at its responsible agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRef {
    pub full_name: Option<String>,
    pub id_like: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl AgentRef {
    pub fn from_raw(raw: &RawRecord) -> Self {
        let get = |spec: &FieldSpec| raw.first_of(spec.aliases).map(|(_, v)| v.to_string());
        let last_name = get(&fields::AGENT_LAST_NAME);
        // With a separate surname column, `agente_nome` is the given name only.
        let (full_name, first_name) = if last_name.is_some() {
            (
                raw.first_of(&["agente_nome_completo", "agente_full_name", "nome_agente"])
                    .map(|(_, v)| v.to_string()),
                get(&fields::AGENT_FIRST_NAME),
            )
        } else {
            (get(&fields::AGENT_FULL_NAME), None)
        };
        Self {
            full_name,
            id_like: get(&fields::AGENT_ID),
            email: get(&fields::AGENT_EMAIL),
            first_name,
            last_name,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.id_like.is_none()
            && self.email.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub client: ClientFields,
    pub agent: AgentRef,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractRecord {
    pub contract: ContractFields,
    pub owner: ClientFields,
    pub owner_ref: Option<String>,
    pub agent: AgentRef,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportRecord {
    PrivateClient(ClientRecord),
    CompanyClient(ClientRecord),
    ElectricityContract(ContractRecord),
    GasContract(ContractRecord),
}

impl ImportRecord {
    /// Builds the typed record; `None` for [`RecordKind::Unknown`].
    pub fn from_raw(kind: RecordKind, raw: &RawRecord) -> Option<Self> {
        let record = match kind {
            RecordKind::ClientPrivate => ImportRecord::PrivateClient(client_record(raw)),
            RecordKind::ClientCompany => ImportRecord::CompanyClient(client_record(raw)),
            RecordKind::ContractElectricity => {
                ImportRecord::ElectricityContract(contract_record(raw))
            }
            RecordKind::ContractGas => ImportRecord::GasContract(contract_record(raw)),
            RecordKind::Unknown => return None,
        };
        Some(record)
    }
}

fn client_record(raw: &RawRecord) -> ClientRecord {
    ClientRecord {
        client: ClientFields {
            values: FieldValues::read(raw, fields::CLIENT),
        },
        agent: AgentRef::from_raw(raw),
        extra: extras(raw, &[fields::CLIENT, fields::CONTROL, fields::RESERVED]),
    }
}

fn contract_record(raw: &RawRecord) -> ContractRecord {
    ContractRecord {
        contract: ContractFields {
            values: FieldValues::read(raw, fields::CONTRACT),
        },
        owner: ClientFields {
            values: FieldValues::read(raw, fields::INLINE_CLIENT),
        },
        owner_ref: raw
            .first_of(fields::CLIENT_REF.aliases)
            .map(|(_, v)| v.to_string()),
        agent: AgentRef::from_raw(raw),
        extra: extras(
            raw,
            &[fields::CONTRACT, fields::INLINE_CLIENT, fields::CONTROL, fields::RESERVED],
        ),
    }
}

fn extras(raw: &RawRecord, consumed: &[&[&FieldSpec]]) -> BTreeMap<String, String> {
    let known = consumed
        .iter()
        .flat_map(|specs| specs.iter())
        .flat_map(|spec| spec.aliases.iter().copied())
        .collect::<BTreeSet<_>>();
    raw.iter()
        .filter(|(key, value)| !known.contains(key) && !value.trim().is_empty())
        .map(|(key, value)| (key.to_string(), value.trim().to_string()))
        .collect()
}
