// crates/sd_forcing/src/csv.rs

//! CSV forcing tables
//!
//! One row per timestep, first column the timestamp, one column per forcing
//! variable named in the header:
//!
//! ```text
//! date_time,air_temp,wind_speed,precip
//! 2018-01-01 00:00,-3.2,2.1,0.0
//! 2018-01-01 01:00,-3.0,,0.4
//! ```
//!
//! Empty cells and `NaN` are "no data". Comment lines and blank lines are
//! skipped.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDateTime;
use sd_foundation::TimestepKey;
use tracing::{info, warn};

use crate::error::{ForcingError, ForcingResult};
use crate::variables::ForcingVariable;

/// CSV load settings
#[derive(Debug, Clone)]
pub struct CsvConfig {
    /// Field separator
    pub delimiter: char,
    /// Timestamp format (chrono)
    pub time_format: String,
    /// Comment prefix
    pub comment_prefix: Option<char>,
    /// Skip malformed rows instead of failing
    pub skip_invalid: bool,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            time_format: "%Y-%m-%d %H:%M".to_string(),
            comment_prefix: Some('#'),
            skip_invalid: false,
        }
    }
}

impl CsvConfig {
    /// Tab separated
    pub fn tab_separated() -> Self {
        Self {
            delimiter: '\t',
            ..Default::default()
        }
    }

    /// Set the timestamp format
    pub fn with_time_format(mut self, format: impl Into<String>) -> Self {
        self.time_format = format.into();
        self
    }
}

/// Loaded forcing table
#[derive(Debug, Clone, Default)]
pub struct ForcingTable {
    variables: Vec<ForcingVariable>,
    rows: BTreeMap<TimestepKey, Vec<Option<f64>>>,
}

impl ForcingTable {
    /// Columns, header order
    pub fn variables(&self) -> &[ForcingVariable] {
        &self.variables
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// No rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First and last key
    pub fn span(&self) -> Option<(TimestepKey, TimestepKey)> {
        let first = self.rows.keys().next()?;
        let last = self.rows.keys().next_back()?;
        Some((*first, *last))
    }

    /// Value of a variable at a key
    pub fn value(&self, variable: ForcingVariable, key: &TimestepKey) -> Option<f64> {
        let col = self.variables.iter().position(|v| *v == variable)?;
        self.rows.get(key).and_then(|row| row[col])
    }
}

/// Load a forcing table from a file
pub fn load_forcing_table(path: &Path, config: &CsvConfig) -> ForcingResult<ForcingTable> {
    let content = std::fs::read_to_string(path)?;
    parse_forcing_table(&content, config, path)
}

/// Parse a forcing table from a string
pub fn parse_forcing_table(
    content: &str,
    config: &CsvConfig,
    path: &Path,
) -> ForcingResult<ForcingTable> {
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, l)| !is_skipped(l, config));

    let (header_idx, header) = lines
        .next()
        .ok_or_else(|| ForcingError::table(path, 1, "missing header"))?;
    let header_line = header_idx + 1;

    let mut variables = Vec::new();
    for (col, name) in header.split(config.delimiter).enumerate().skip(1) {
        let variable: ForcingVariable = name.parse().map_err(|_| {
            ForcingError::table(
                path,
                header_line,
                format!("column {}: unknown variable '{}'", col, name.trim()),
            )
        })?;
        if variables.contains(&variable) {
            return Err(ForcingError::table(
                path,
                header_line,
                format!("duplicate column '{}'", variable),
            ));
        }
        variables.push(variable);
    }
    if variables.is_empty() {
        return Err(ForcingError::table(path, header_line, "no variable columns"));
    }

    let mut rows = BTreeMap::new();
    let mut skipped = Vec::new();

    for (idx, line) in lines {
        let line_num = idx + 1;
        match parse_row(line, config, variables.len()) {
            Ok((key, values)) => {
                if rows.insert(key, values).is_some() {
                    warn!(path = %path.display(), line = line_num, "duplicate timestamp, keeping the last row");
                }
            }
            Err(message) => {
                if !config.skip_invalid {
                    return Err(ForcingError::table(path, line_num, message));
                }
                skipped.push(line_num);
            }
        }
    }

    if !skipped.is_empty() {
        let preview: Vec<_> = skipped.iter().take(5).collect();
        warn!(
            path = %path.display(),
            "skipped {} invalid lines (first few: {:?}{})",
            skipped.len(),
            preview,
            if skipped.len() > 5 { "..." } else { "" }
        );
    }

    if rows.is_empty() {
        return Err(ForcingError::table(path, 0, "no valid rows"));
    }

    info!(
        path = %path.display(),
        rows = rows.len(),
        columns = variables.len(),
        "loaded forcing table"
    );

    Ok(ForcingTable { variables, rows })
}

fn is_skipped(line: &str, config: &CsvConfig) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty()
        || config
            .comment_prefix
            .map_or(false, |p| trimmed.starts_with(p))
}

fn parse_row(
    line: &str,
    config: &CsvConfig,
    n_vars: usize,
) -> Result<(TimestepKey, Vec<Option<f64>>), String> {
    let parts: Vec<&str> = line.split(config.delimiter).collect();
    if parts.len() != n_vars + 1 {
        return Err(format!("expected {} columns, got {}", n_vars + 1, parts.len()));
    }

    let time_str = parts[0].trim();
    let key = NaiveDateTime::parse_from_str(time_str, &config.time_format)
        .map_err(|e| format!("bad timestamp '{}': {}", time_str, e))?;

    let mut values = Vec::with_capacity(n_vars);
    for cell in &parts[1..] {
        let cell = cell.trim();
        if cell.is_empty() {
            values.push(None);
            continue;
        }
        let v: f64 = cell
            .parse()
            .map_err(|_| format!("bad value '{}'", cell))?;
        values.push(if v.is_finite() { Some(v) } else { None });
    }
    Ok((key, values))
}
