//! Export rows and recovery.
//!
//! A results row is the flat record written when the operator prints the
//! current state: every parameter value (with the sign convention encoded
//! as a negative `Rinf`), the derived secondary parameters, the time-domain
//! integral variables, a timestamp and the sample id. Rows are also the
//! recovery source: looking up the latest row for a sample restores the
//! slider state, including the sign flag.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZarcError};
use crate::parameters::{wrap_angle, ParameterSet};

/// One exported record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsRow {
    /// Sample id the row belongs to (the measurement file name)
    pub sample: String,

    pub timestamp: DateTime<Utc>,

    /// Parameter values in export convention: `Rinf` carries its sign
    pub values: HashMap<String, f64>,

    /// Derived secondary parameters at export time
    #[serde(default)]
    pub secondary: HashMap<String, f64>,

    /// Time-domain integral variables at export time
    #[serde(default)]
    pub integral_variables: HashMap<String, f64>,
}

impl ResultsRow {
    /// Build a row from the current parameter set. An active sign transform
    /// is encoded by negating the exported `Rinf`; the stored UI value
    /// stays positive.
    pub fn from_parameters(
        sample: &str,
        set: &ParameterSet,
        secondary: HashMap<String, f64>,
        integral_variables: HashMap<String, f64>,
    ) -> Self {
        let mut values = set.values();
        for param in set.iter() {
            if param.is_sign_designated() && param.sign_transform_active() {
                if let Some(v) = values.get_mut(param.name()) {
                    *v = -*v;
                }
            }
        }
        Self {
            sample: sample.to_string(),
            timestamp: Utc::now(),
            values,
            secondary,
            integral_variables,
        }
    }

    /// Decode the row back into store state: UI values plus the sign flag.
    /// A negative `Rinf` means the flag was on and the stored value is its
    /// magnitude; the phase angle is wrapped onto the canonical range.
    pub fn recovered_values(&self) -> (HashMap<String, f64>, bool) {
        let mut values = self.values.clone();
        let mut sign_active = false;

        if let Some(rinf) = values.get_mut("Rinf") {
            if *rinf < 0.0 {
                *rinf = rinf.abs();
                sign_active = true;
            }
        }
        if let Some(pei) = values.get_mut("Pei") {
            *pei = wrap_angle(*pei);
        }
        (values, sign_active)
    }
}

/// Storage for exported rows.
pub trait ResultsLog {
    /// Append a row.
    fn append(&mut self, row: &ResultsRow) -> Result<()>;

    /// The most recent row for a sample, or `NoMatchingSample`.
    fn find_row(&self, sample: &str) -> Result<ResultsRow>;
}

/// In-memory log, mainly for tests and throwaway sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    rows: Vec<ResultsRow>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[ResultsRow] {
        &self.rows
    }
}

impl ResultsLog for MemoryLog {
    fn append(&mut self, row: &ResultsRow) -> Result<()> {
        self.rows.push(row.clone());
        Ok(())
    }

    fn find_row(&self, sample: &str) -> Result<ResultsRow> {
        self.rows
            .iter()
            .rev()
            .find(|r| r.sample == sample)
            .cloned()
            .ok_or_else(|| ZarcError::NoMatchingSample(sample.to_string()))
    }
}

/// Append-only JSON-lines file, one row per line.
#[derive(Debug, Clone)]
pub struct JsonLinesLog {
    path: PathBuf,
}

impl JsonLinesLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ResultsLog for JsonLinesLog {
    fn append(&mut self, row: &ResultsRow) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(row)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn find_row(&self, sample: &str) -> Result<ResultsRow> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ZarcError::NoMatchingSample(sample.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        // Latest row wins; scan the whole file and keep the last match
        let mut found = None;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row: ResultsRow = serde_json::from_str(&line)?;
            if row.sample == sample {
                found = Some(row);
            }
        }
        found.ok_or_else(|| ZarcError::NoMatchingSample(sample.to_string()))
    }
}
