use log::{debug, warn};

use crate::{
    data::Row,
    error::{StoreError, Warning},
    query::Select,
    record::AgentRef,
    schema::TargetColumnSet,
    store::{ColumnInfo, Store},
};

use super::names::{exact_name_match, fuzzy_name_match};

const FIRST_NAME_COLUMNS: &[&str] = &["nome", "first_name"];
const LAST_NAME_COLUMNS: &[&str] = &["cognome", "last_name"];
const EMAIL_COLUMNS: &[&str] = &["email"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameLookup<'a> {
    Found(&'a Agent),
    Ambiguous(usize),
    Missing,
}

impl<'a> NameLookup<'a> {
    fn from_matches(matches: Vec<&'a Agent>) -> Self {
        match matches.as_slice() {
            [] => NameLookup::Missing,
            [only] => NameLookup::Found(only),
            many => NameLookup::Ambiguous(many.len()),
        }
    }
}

/// Users that may be assigned as agents, read once per job.
#[derive(Debug, Clone, Default)]
pub struct AgentDirectory {
    agents: Vec<Agent>,
}

impl AgentDirectory {
    pub fn from_agents(agents: Vec<Agent>) -> Self {
        Self { agents }
    }

    /// Reads the user table. `Ok(None)` when the table does not exist.
    pub fn load(store: &mut dyn Store, table: &str) -> Result<Option<Self>, StoreError> {
        let Some(set) = TargetColumnSet::introspect(store, table)? else {
            return Ok(None);
        };
        let Some(pk) = set.primary_key() else {
            warn!("Table '{table}' has no usable key; agent matching disabled");
            return Ok(Some(Self::default()));
        };
        let first = set.first_present(FIRST_NAME_COLUMNS);
        let last = set.first_present(LAST_NAME_COLUMNS);
        let email = set.first_present(EMAIL_COLUMNS);

        let mut select = Select::new(&set).column(pk);
        for column in [first, last, email].into_iter().flatten() {
            select = select.column(column);
        }
        let (sql, params) = select.build(store.placeholder_style())?;
        let rows = store.query(&sql, &params)?;

        let text = |row: &Row, column: Option<&ColumnInfo>| {
            column
                .and_then(|c| row.get(&c.name))
                .and_then(|v| v.as_reference())
        };
        let agents = rows
            .iter()
            .filter_map(|row| {
                let id = text(row, Some(pk))?;
                Some(Agent {
                    id,
                    first_name: text(row, first).unwrap_or_default(),
                    last_name: text(row, last).unwrap_or_default(),
                    email: text(row, email),
                })
            })
            .collect::<Vec<_>>();
        debug!("Loaded {} agent(s) from '{table}'", agents.len());
        Ok(Some(Self { agents }))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn by_id(&self, id: &str) -> Option<&Agent> {
        let id = id.trim();
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn by_email(&self, email: &str) -> Option<&Agent> {
        let email = email.trim().to_lowercase();
        self.agents
            .iter()
            .find(|a| a.email.as_deref().is_some_and(|e| e.trim().to_lowercase() == email))
    }

    /// Exact `first last`/`last first` match, falling back to token containment.
    pub fn by_name(&self, name: &str) -> NameLookup<'_> {
        let exact = self
            .agents
            .iter()
            .filter(|a| exact_name_match(name, &a.first_name, &a.last_name))
            .collect::<Vec<_>>();
        if !exact.is_empty() {
            return NameLookup::from_matches(exact);
        }
        NameLookup::from_matches(
            self.agents
                .iter()
                .filter(|a| fuzzy_name_match(name, &a.first_name, &a.last_name))
                .collect(),
        )
    }

    /// Resolves an agent reference to a user id, recording a warning for each
    /// reference that could not be matched.
    pub fn resolve(
        &self,
        agent: &AgentRef,
        row: usize,
        warnings: &mut Vec<Warning>,
    ) -> Option<String> {
        let mut unresolved = |message: String| {
            warn!("Row {row}: {message}");
            warnings.push(Warning::Resolution { row, message });
        };

        if let Some(name) = agent.full_name.as_deref() {
            match self.by_name(name) {
                NameLookup::Found(found) => return Some(found.id.clone()),
                NameLookup::Ambiguous(count) => {
                    unresolved(format!("agent name '{name}' matches {count} users"))
                }
                NameLookup::Missing => unresolved(format!("agent '{name}' not found")),
            }
        }

        if let Some(value) = agent.id_like.as_deref() {
            if let Some(found) = self.by_id(value) {
                return Some(found.id.clone());
            }
            if value.contains('@')
                && let Some(found) = self.by_email(value)
            {
                return Some(found.id.clone());
            }
            match self.by_name(value) {
                NameLookup::Found(found) => return Some(found.id.clone()),
                NameLookup::Ambiguous(count) => {
                    unresolved(format!("agent name '{value}' matches {count} users"))
                }
                NameLookup::Missing => unresolved(format!("agent reference '{value}' not found")),
            }
        }

        if let Some(email) = agent.email.as_deref() {
            if let Some(found) = self.by_email(email) {
                return Some(found.id.clone());
            }
            unresolved(format!("agent e-mail '{email}' not found"));
        }

        let parts = [agent.first_name.as_deref(), agent.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        if !parts.is_empty() {
            let name = parts.join(" ");
            match self.by_name(&name) {
                NameLookup::Found(found) => return Some(found.id.clone()),
                NameLookup::Ambiguous(count) => {
                    unresolved(format!("agent name '{name}' matches {count} users"))
                }
                NameLookup::Missing => unresolved(format!("agent '{name}' not found")),
            }
        }
        None
    }
}
