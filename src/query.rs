use crate::{
    data::Value,
    error::StoreError,
    normalize::TypeFamily,
    schema::TargetColumnSet,
    store::{ColumnInfo, PlaceholderStyle, quote_identifier, validate_identifier},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    Exact,
    /// `UPPER(TRIM(col)) = value`, value upper-cased and trimmed.
    UpperTrim,
    /// `LOWER(TRIM(col)) = value`, value lower-cased and trimmed.
    LowerTrim,
    NotEqual,
}

#[derive(Debug, Clone)]
struct Filter<'a> {
    column: &'a ColumnInfo,
    op: Match,
    value: Value,
}

fn checked(set: &TargetColumnSet, column: &ColumnInfo) -> Result<String, StoreError> {
    match set.column(&column.name) {
        Some(known) => Ok(quote_identifier(validate_identifier(&known.name)?)),
        None => Err(StoreError::InvalidIdentifier(format!(
            "{}.{}",
            set.table(),
            column.name
        ))),
    }
}

fn table_name(set: &TargetColumnSet) -> Result<String, StoreError> {
    Ok(quote_identifier(validate_identifier(set.table())?))
}

/// Binds an entity reference with the affinity of its key column.
pub fn key_value(column: &ColumnInfo, id: &str) -> Value {
    match TypeFamily::of(&column.sql_type) {
        TypeFamily::Integer => id
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::text(id)),
        _ => Value::text(id),
    }
}

#[derive(Debug, Clone)]
pub struct Select<'a> {
    set: &'a TargetColumnSet,
    projection: Vec<&'a ColumnInfo>,
    filters: Vec<Filter<'a>>,
    limit: Option<usize>,
}

impl<'a> Select<'a> {
    pub fn new(set: &'a TargetColumnSet) -> Self {
        Self {
            set,
            projection: Vec::new(),
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn column(mut self, column: &'a ColumnInfo) -> Self {
        self.projection.push(column);
        self
    }

    pub fn filter(mut self, column: &'a ColumnInfo, op: Match, value: impl Into<Value>) -> Self {
        let value = match (op, value.into()) {
            (Match::UpperTrim, Value::Text(s)) => Value::Text(s.trim().to_uppercase()),
            (Match::LowerTrim, Value::Text(s)) => Value::Text(s.trim().to_lowercase()),
            (_, other) => other,
        };
        self.filters.push(Filter { column, op, value });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(&self, style: PlaceholderStyle) -> Result<(String, Vec<Value>), StoreError> {
        let projection = if self.projection.is_empty() {
            "*".to_string()
        } else {
            self.projection
                .iter()
                .map(|c| checked(self.set, c))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        };
        let mut sql = format!("SELECT {projection} FROM {}", table_name(self.set)?);
        let mut params = Vec::with_capacity(self.filters.len());
        for (idx, filter) in self.filters.iter().enumerate() {
            let column = checked(self.set, filter.column)?;
            let placeholder = style.render(idx + 1);
            let clause = match filter.op {
                Match::Exact => format!("{column} = {placeholder}"),
                Match::UpperTrim => format!("UPPER(TRIM({column})) = {placeholder}"),
                Match::LowerTrim => format!("LOWER(TRIM({column})) = {placeholder}"),
                Match::NotEqual => format!("{column} <> {placeholder}"),
            };
            sql.push_str(if idx == 0 { " WHERE " } else { " AND " });
            sql.push_str(&clause);
            params.push(filter.value.clone());
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        Ok((sql, params))
    }
}

#[derive(Debug, Clone)]
pub struct Insert<'a> {
    set: &'a TargetColumnSet,
    assignments: Vec<(&'a ColumnInfo, Value)>,
    returning: Option<&'a ColumnInfo>,
}

impl<'a> Insert<'a> {
    pub fn new(set: &'a TargetColumnSet) -> Self {
        Self {
            set,
            assignments: Vec::new(),
            returning: None,
        }
    }

    pub fn set(mut self, column: &'a ColumnInfo, value: impl Into<Value>) -> Self {
        self.assignments.push((column, value.into()));
        self
    }

    pub fn returning(mut self, column: &'a ColumnInfo) -> Self {
        self.returning = Some(column);
        self
    }

    pub fn build(&self, style: PlaceholderStyle) -> Result<(String, Vec<Value>), StoreError> {
        let table = table_name(self.set)?;
        let mut sql = if self.assignments.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let columns = self
                .assignments
                .iter()
                .map(|(c, _)| checked(self.set, c))
                .collect::<Result<Vec<_>, _>>()?;
            let placeholders = (1..=columns.len())
                .map(|idx| style.render(idx))
                .collect::<Vec<_>>();
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        if let Some(column) = self.returning {
            sql.push_str(&format!(" RETURNING {}", checked(self.set, column)?));
        }
        let params = self.assignments.iter().map(|(_, v)| v.clone()).collect();
        Ok((sql, params))
    }
}

#[derive(Debug, Clone)]
pub struct Update<'a> {
    set: &'a TargetColumnSet,
    assignments: Vec<(&'a ColumnInfo, Value)>,
    key: Option<(&'a ColumnInfo, Value)>,
}

impl<'a> Update<'a> {
    pub fn new(set: &'a TargetColumnSet) -> Self {
        Self {
            set,
            assignments: Vec::new(),
            key: None,
        }
    }

    pub fn set(mut self, column: &'a ColumnInfo, value: impl Into<Value>) -> Self {
        self.assignments.push((column, value.into()));
        self
    }

    pub fn key(mut self, column: &'a ColumnInfo, value: impl Into<Value>) -> Self {
        self.key = Some((column, value.into()));
        self
    }

    /// Renders the statement; `None` when there is nothing to assign.
    pub fn build(
        &self,
        style: PlaceholderStyle,
    ) -> Result<Option<(String, Vec<Value>)>, StoreError> {
        if self.assignments.is_empty() {
            return Ok(None);
        }
        let (key_column, key_value) = self
            .key
            .as_ref()
            .ok_or_else(|| StoreError::InvalidIdentifier(format!("{}.<key>", self.set.table())))?;
        let mut params = Vec::with_capacity(self.assignments.len() + 1);
        let mut clauses = Vec::with_capacity(self.assignments.len());
        for (idx, (column, value)) in self.assignments.iter().enumerate() {
            clauses.push(format!(
                "{} = {}",
                checked(self.set, column)?,
                style.render(idx + 1)
            ));
            params.push(value.clone());
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            table_name(self.set)?,
            clauses.join(", "),
            checked(self.set, key_column)?,
            style.render(params.len() + 1)
        );
        params.push(key_value.clone());
        Ok(Some((sql, params)))
    }
}
