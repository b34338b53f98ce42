//! The load processor: what happens to mapped rows after the pipeline has
//! decoded them. Submission to the external load API lives behind
//! [`LoadProcessor`]; [`LocalExportProcessor`] writes CSV exports instead.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::json;
use thiserror::Error;

use super::tabular::TabularData;
use crate::model::{OutputFile, ProcessingStep};
use crate::tenant;

/// Phases a processor reports while it works.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorPhase {
    Submitting,
    Enriching,
    Exporting,
}

impl ProcessorPhase {
    pub fn step(&self) -> ProcessingStep {
        match self {
            ProcessorPhase::Submitting => ProcessingStep::SubmittingApi,
            ProcessorPhase::Enriching => ProcessingStep::EnrichingData,
            ProcessorPhase::Exporting => ProcessingStep::GeneratingResults,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Rejected by load processor: {0}")]
    Rejected(String),

    #[error("Load processor unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to write export '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write CSV export: {0}")]
    Csv(#[from] csv::Error),
}

pub struct ProcessRequest<'a> {
    pub job_id: &'a str,
    pub tenant_key: &'a str,
    pub filename: &'a str,
    pub data: &'a TabularData,
    pub credentials: Option<&'a SecretString>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSummary {
    pub records_processed: u64,
    pub records_successful: u64,
    pub records_failed: u64,
    pub output_files: Vec<OutputFile>,
    pub summary_data: Option<serde_json::Value>,
    pub warnings: Vec<String>,
}

pub trait LoadProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Processes mapped rows, calling `on_phase` as it moves through
    /// submission, enrichment and export.
    fn process(
        &self,
        request: &ProcessRequest<'_>,
        on_phase: &mut dyn FnMut(ProcessorPhase),
    ) -> Result<ProcessSummary, ProcessorError>;
}

/// Writes accepted rows to `<output_dir>/<tenant>/<job_id>.csv` and rows
/// missing a required column to `<job_id>_rejected.csv`.
pub struct LocalExportProcessor {
    output_dir: PathBuf,
    required_columns: Vec<String>,
}

impl LocalExportProcessor {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            required_columns: Vec::new(),
        }
    }

    pub fn with_required_columns(mut self, columns: Vec<String>) -> Self {
        self.required_columns = columns;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Splits row indices into accepted and rejected.
    fn validate(&self, data: &TabularData) -> (Vec<usize>, Vec<usize>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut required = Vec::new();
        for column in &self.required_columns {
            match data.find_column(column) {
                Some(index) => required.push(index),
                None => warnings.push(format!("Required column '{}' is missing", column)),
            }
        }
        let all_present = warnings.is_empty();

        let (accepted, rejected): (Vec<usize>, Vec<usize>) = (0..data.len()).partition(|&row| {
            all_present
                && required
                    .iter()
                    .all(|&col| !data.rows[row][col].trim().is_empty())
        });
        (accepted, rejected, warnings)
    }

    fn write_rows(
        &self,
        path: &Path,
        headers: &[String],
        rows: impl Iterator<Item = Vec<String>>,
    ) -> Result<OutputFile, ProcessorError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(headers)?;
        for row in rows {
            writer.write_record(&row)?;
        }
        writer.flush().map_err(|e| ProcessorError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Ok(OutputFile {
            kind: "csv".to_string(),
            path: path.display().to_string(),
            size,
        })
    }
}

impl LoadProcessor for LocalExportProcessor {
    fn name(&self) -> &str {
        "local_export"
    }

    fn process(
        &self,
        request: &ProcessRequest<'_>,
        on_phase: &mut dyn FnMut(ProcessorPhase),
    ) -> Result<ProcessSummary, ProcessorError> {
        let data = request.data;

        on_phase(ProcessorPhase::Submitting);
        let (accepted, rejected, warnings) = self.validate(data);

        on_phase(ProcessorPhase::Enriching);
        let mut headers = data.headers.clone();
        headers.push("loadrelay_job_id".to_string());
        headers.push("loadrelay_row".to_string());
        let enrich = |row: usize| {
            let mut cells = data.rows[row].clone();
            cells.push(request.job_id.to_string());
            cells.push((row + 1).to_string());
            cells
        };

        on_phase(ProcessorPhase::Exporting);
        let dir = self.output_dir.join(tenant::storage_key(request.tenant_key));
        std::fs::create_dir_all(&dir).map_err(|e| ProcessorError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let mut output_files = vec![self.write_rows(
            &dir.join(format!("{}.csv", request.job_id)),
            &headers,
            accepted.iter().map(|&row| enrich(row)),
        )?];
        if !rejected.is_empty() {
            output_files.push(self.write_rows(
                &dir.join(format!("{}_rejected.csv", request.job_id)),
                &headers,
                rejected.iter().map(|&row| enrich(row)),
            )?);
        }

        Ok(ProcessSummary {
            records_processed: data.len() as u64,
            records_successful: accepted.len() as u64,
            records_failed: rejected.len() as u64,
            summary_data: Some(json!({
                "processor": self.name(),
                "source_file": request.filename,
                "exported": accepted.len(),
                "rejected": rejected.len(),
                "columns": data.headers,
            })),
            output_files,
            warnings,
        })
    }
}
