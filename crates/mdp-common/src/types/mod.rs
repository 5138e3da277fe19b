//! Shared domain types for the MDP pipeline
//!
//! The identity, status, and envelope types exchanged between the scraper
//! and importer services. The wire envelope uses stable PascalCase field
//! names so the two processes stay byte-for-byte compatible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use crate::error::{PipelineError, Result};

/// Identity of a scrape operation: the owning service and the procedure.
///
/// Compared and hashed case-insensitively on both fields, so
/// `{"TickerService", "scrape_listed"}` and `{"tickerservice",
/// "SCRAPE_LISTED"}` address the same map entry everywhere an operation's
/// latest state is tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProcedure {
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "Procedure")]
    pub procedure: String,
}

impl ServiceProcedure {
    pub fn new(service: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            procedure: procedure.into(),
        }
    }
}

fn fold_chars(s: &str) -> impl Iterator<Item = char> + '_ {
    s.chars().flat_map(char::to_lowercase)
}

impl PartialEq for ServiceProcedure {
    fn eq(&self, other: &Self) -> bool {
        fold_chars(&self.service).eq(fold_chars(&other.service))
            && fold_chars(&self.procedure).eq(fold_chars(&other.procedure))
    }
}

impl Eq for ServiceProcedure {}

// Hash must agree with the case-insensitive equality above, so both fields
// are hashed through the same case fold.
impl Hash for ServiceProcedure {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in fold_chars(&self.service) {
            state.write_u32(c as u32);
        }
        state.write_u8(0xff);
        for c in fold_chars(&self.procedure) {
            state.write_u32(c as u32);
        }
    }
}

impl std::fmt::Display for ServiceProcedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "service '{}' procedure '{}'", self.service, self.procedure)
    }
}

/// Outcome severity for a service procedure run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Information,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Information => write!(f, "Information"),
            Status::Success => write!(f, "Success"),
            Status::Warning => write!(f, "Warning"),
            Status::Error => write!(f, "Error"),
        }
    }
}

/// Latest observed state of one service procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceProcedureStatus {
    pub service_procedure: ServiceProcedure,
    pub status: Status,
    pub detail: String,
    pub utc_timestamp: DateTime<Utc>,
}

impl ServiceProcedureStatus {
    pub fn now(
        service_procedure: ServiceProcedure,
        status: Status,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            service_procedure,
            status,
            detail: detail.into(),
            utc_timestamp: Utc::now(),
        }
    }
}

/// Message exchanged between the scraper and importer services.
///
/// The payload is opaque to the coordinators; only the importer's mapping
/// layer interprets it. Field names are part of the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(rename = "ServiceProcedure")]
    pub service_procedure: ServiceProcedure,
    #[serde(rename = "Data")]
    pub data: String,
}

impl MessageEnvelope {
    pub fn new(service_procedure: ServiceProcedure, data: impl Into<String>) -> Self {
        Self {
            service_procedure,
            data: data.into(),
        }
    }

    /// Serialize to the UTF-8 JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from the UTF-8 JSON wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::MalformedEnvelope(e.to_string()))
    }
}

/// Column type in a [`DataTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
}

/// Column definition in a [`DataTable`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A named, two-dimensional typed dataset.
///
/// Scrapers produce one per run (or per ticker), serialize it into the
/// envelope payload, and the importer hands it to the configured stored
/// procedure as a single table-valued parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl DataTable {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, enforcing that its arity matches the column set.
    pub fn push_row(&mut self, row: Vec<serde_json::Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(PipelineError::InvalidPayload(format!(
                "row has {} values but table '{}' has {} columns",
                row.len(),
                self.name,
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parse a table from its JSON payload form and validate its shape.
    pub fn from_json(data: &str) -> Result<Self> {
        let table: DataTable = serde_json::from_str(data)
            .map_err(|e| PipelineError::InvalidPayload(e.to_string()))?;
        table.validate()?;
        Ok(table)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check that every row matches the column arity.
    pub fn validate(&self) -> Result<()> {
        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(PipelineError::InvalidPayload(format!(
                    "row {} has {} values but table '{}' has {} columns",
                    index,
                    row.len(),
                    self.name,
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }
}
