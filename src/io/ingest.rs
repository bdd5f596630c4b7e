//! Survey CSV ingest and validation.
//!
//! This module turns a semicolon-delimited survey export into validated
//! `SurveyRecord`s that are safe to transform and fit.
//!
//! Design goals:
//! - **Strict schema** for required columns (clear errors + exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Exposure guard**: rows with non-positive exposure never reach the log-offset
//! - **Separation of concerns**: no transform or fitting logic here

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;

use crate::domain::{ColumnMap, DatasetStats, SurveyRecord};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output: validated records + stats + row errors.
#[derive(Debug, Clone)]
pub struct IngestedSurvey {
    pub records: Vec<SurveyRecord>,
    pub stats: DatasetStats,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

/// Load and validate a survey file.
pub fn load_survey(path: &Path, columns: &ColumnMap) -> Result<IngestedSurvey, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open survey file '{}': {e}", path.display())))?;
    read_survey(file, columns)
}

/// Read survey rows from any reader (used directly by tests).
pub fn read_survey<R: Read>(reader: R, columns: &ColumnMap) -> Result<IngestedSurvey, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read survey headers: {e}")))?
        .clone();

    let header_map = build_header_map(&headers);
    let layout = resolve_layout(columns, &header_map)?;

    let mut records = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header line; lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &layout) {
            Ok(row) => records.push(row),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    let rows_used = records.len();
    if rows_used == 0 {
        return Err(AppError::no_data("No valid survey rows remain after validation."));
    }

    let stats = compute_stats(&records)
        .ok_or_else(|| AppError::no_data("No valid survey rows remain after validation."))?;

    if !row_errors.is_empty() {
        tracing::warn!(
            skipped = row_errors.len(),
            rows_read,
            "some survey rows were skipped during ingest"
        );
    }
    tracing::info!(rows_used, sites = stats.n_sites, observers = stats.n_observers, "survey loaded");

    Ok(IngestedSurvey {
        records,
        stats,
        row_errors,
        rows_read,
        rows_used,
    })
}

/// Column positions resolved once from the header line.
#[derive(Debug, Clone)]
struct Layout {
    site: usize,
    observer: usize,
    date: Option<usize>,
    temperature: usize,
    forest: usize,
    exposure: usize,
    response: usize,
    names: ColumnMap,
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often carry a UTF-8 BOM on the first header.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn resolve_layout(columns: &ColumnMap, header_map: &HashMap<String, usize>) -> Result<Layout, AppError> {
    let required = |name: &str| -> Result<usize, AppError> {
        header_map
            .get(&normalize_header_name(name))
            .copied()
            .ok_or_else(|| AppError::input(format!("Missing required column: `{name}`")))
    };

    Ok(Layout {
        site: required(&columns.site)?,
        observer: required(&columns.observer)?,
        date: header_map.get(&normalize_header_name(&columns.date)).copied(),
        temperature: required(&columns.temperature)?,
        forest: required(&columns.forest)?,
        exposure: required(&columns.exposure)?,
        response: required(&columns.response)?,
        names: columns.clone(),
    })
}

fn parse_row(record: &StringRecord, layout: &Layout) -> Result<SurveyRecord, String> {
    let names = &layout.names;

    let site = get_required(record, layout.site, &names.site)?.to_string();
    let observer = get_required(record, layout.observer, &names.observer)?.to_string();

    let date = match layout.date.and_then(|idx| get_optional(record, idx)) {
        Some(s) => Some(parse_date(s)?),
        None => None,
    };

    let temperature = parse_f64(get_required(record, layout.temperature, &names.temperature)?, &names.temperature)?;
    let forest = parse_f64(get_required(record, layout.forest, &names.forest)?, &names.forest)?;

    let exposure = parse_f64(get_required(record, layout.exposure, &names.exposure)?, &names.exposure)?;
    if exposure <= 0.0 {
        return Err(format!(
            "Non-positive `{}` ({exposure}); exposure is used as a log-offset.",
            names.exposure
        ));
    }

    let response = parse_count(get_required(record, layout.response, &names.response)?, &names.response)?;

    Ok(SurveyRecord {
        site,
        observer,
        date,
        temperature,
        forest,
        exposure,
        response,
    })
}

fn get_required<'a>(record: &'a StringRecord, idx: usize, name: &str) -> Result<&'a str, String> {
    get_optional(record, idx).ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_f64(s: &str, name: &str) -> Result<f64, String> {
    // Continental exports sometimes use a decimal comma alongside the `;` delimiter.
    let normalized = s.replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("Invalid number '{s}' in `{name}`.")),
    }
}

fn parse_count(s: &str, name: &str) -> Result<u64, String> {
    if let Ok(v) = s.parse::<u64>() {
        return Ok(v);
    }
    // Accept integral floats such as "3.0"; reject fractions and negatives.
    let v = parse_f64(s, name)?;
    if v < 0.0 {
        return Err(format!("Negative count '{s}' in `{name}`."));
    }
    if v.fract() != 0.0 {
        return Err(format!("Non-integer count '{s}' in `{name}`."));
    }
    Ok(v as u64)
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    const FMTS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y", "%Y/%m/%d"];
    for fmt in FMTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    Err(format!(
        "Invalid date '{s}'. Expected one of: YYYY-MM-DD, DD/MM/YYYY, DD.MM.YYYY, YYYY/MM/DD."
    ))
}

pub(crate) fn compute_stats(records: &[SurveyRecord]) -> Option<DatasetStats> {
    let first = records.first()?;

    let mut sites = HashSet::new();
    let mut observers = HashSet::new();
    let mut stats = DatasetStats {
        n_rows: records.len(),
        n_sites: 0,
        n_observers: 0,
        count_min: first.response,
        count_max: first.response,
        exposure_min: f64::INFINITY,
        exposure_max: f64::NEG_INFINITY,
        temperature_min: f64::INFINITY,
        temperature_max: f64::NEG_INFINITY,
        date_min: None,
        date_max: None,
    };

    for r in records {
        sites.insert(r.site.as_str());
        observers.insert(r.observer.as_str());
        stats.count_min = stats.count_min.min(r.response);
        stats.count_max = stats.count_max.max(r.response);
        stats.exposure_min = stats.exposure_min.min(r.exposure);
        stats.exposure_max = stats.exposure_max.max(r.exposure);
        stats.temperature_min = stats.temperature_min.min(r.temperature);
        stats.temperature_max = stats.temperature_max.max(r.temperature);
        if let Some(d) = r.date {
            stats.date_min = Some(stats.date_min.map_or(d, |m| m.min(d)));
            stats.date_max = Some(stats.date_max.map_or(d, |m| m.max(d)));
        }
    }

    stats.n_sites = sites.len();
    stats.n_observers = observers.len();
    Some(stats)
}
