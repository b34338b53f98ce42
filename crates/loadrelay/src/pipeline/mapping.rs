//! Saved column mappings: rename file columns to the names the load
//! processor expects.

use std::collections::BTreeMap;

use super::error::PipelineWarning;
use super::tabular::TabularData;

/// File column → target column.
pub type ColumnMappings = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingReport {
    /// (original header, new header) pairs that were applied.
    pub applied: Vec<(String, String)>,
    pub warnings: Vec<PipelineWarning>,
}

/// Renames columns in place. Sources match headers ignoring case; all renames
/// are resolved against the original headers, so swaps work. A rename that
/// would produce a duplicate column is skipped with a warning.
pub fn apply_mappings(data: &mut TabularData, mappings: &ColumnMappings) -> MappingReport {
    let mut report = MappingReport::default();
    let original = data.headers.clone();
    let mut renamed = original.clone();

    for (source, target) in mappings {
        let target = target.trim();
        if target.is_empty() {
            continue;
        }
        match data.find_column(source) {
            Some(index) => renamed[index] = target.to_string(),
            None => report.warnings.push(PipelineWarning::UnmatchedMapping {
                source: source.clone(),
            }),
        }
    }

    for i in 0..renamed.len() {
        if renamed[i] == original[i] {
            continue;
        }
        let collides = renamed
            .iter()
            .enumerate()
            .any(|(j, other)| j != i && other.eq_ignore_ascii_case(&renamed[i]));
        if collides {
            report.warnings.push(PipelineWarning::DuplicateColumn {
                column: renamed[i].clone(),
            });
            renamed[i] = original[i].clone();
        } else {
            report.applied.push((original[i].clone(), renamed[i].clone()));
        }
    }

    if !report.applied.is_empty() {
        tracing::debug!("Applied {} column mappings", report.applied.len());
    }
    data.headers = renamed;
    report
}
