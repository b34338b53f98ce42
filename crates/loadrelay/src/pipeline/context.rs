use secrecy::SecretString;

use crate::inbox::Attachment;
use crate::model::Job;

use super::error::PipelineWarning;
use super::mapping::MappingReport;
use super::processor::ProcessSummary;
use super::tabular::TabularData;

pub struct PipelineContext<'a> {
    // Input
    pub job: Job,
    pub attachment: &'a Attachment,

    // parsing_email result, renamed in place by applying_mappings
    pub data: Option<TabularData>,

    // applying_mappings results
    pub mapping: Option<MappingReport>,
    pub credentials: Option<SecretString>,

    // Load processor result
    pub summary: Option<ProcessSummary>,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(job: Job, attachment: &'a Attachment) -> Self {
        Self {
            job,
            attachment,
            data: None,
            mapping: None,
            credentials: None,
            summary: None,
            warnings: Vec::new(),
        }
    }
}
