use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, info_span, warn};

use crate::inbox::Attachment;
use crate::model::{Job, JobUpdate, ProcessingResult, ProcessingStep};
use crate::storage::UnifiedStorage;

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::{PipelineError, PipelineWarning};
use super::mapping::apply_mappings;
use super::processor::{LoadProcessor, ProcessRequest, ProcessorPhase};
use super::progress::{ProgressEvent, ProgressReporter, StorageProgress};
use super::tabular::TabularData;

pub struct Pipeline {
    storage: Arc<UnifiedStorage>,
    processor: Arc<dyn LoadProcessor>,
}

impl Pipeline {
    pub fn new(storage: Arc<UnifiedStorage>, processor: Arc<dyn LoadProcessor>) -> Self {
        Self { storage, processor }
    }

    pub fn storage(&self) -> &Arc<UnifiedStorage> {
        &self.storage
    }

    /// Runs an already stored job, writing progress and the final result
    /// through to storage.
    pub fn run(&self, job: Job, attachment: &Attachment, config: &PipelineConfig) -> ProcessingResult {
        let progress = StorageProgress::new(self.storage.clone(), &job);
        let (result, _ctx) = self.run_with(PipelineContext::new(job, attachment), config, &progress);
        result
    }

    /// Processes an attachment again as a new job. `None` when the job
    /// could not be stored.
    pub fn reprocess(
        &self,
        attachment: &Attachment,
        tenant_key: &str,
        config: &PipelineConfig,
    ) -> Option<ProcessingResult> {
        let job = self.storage.create_job(
            &attachment.filename,
            tenant_key,
            &attachment.sender,
            attachment.size(),
            &attachment.mime_type,
        )?;
        Some(self.run(job, attachment, config))
    }

    /// Run the full pipeline for one attachment.
    /// Returns the terminal result together with the final context.
    pub fn run_with<'a>(
        &self,
        mut ctx: PipelineContext<'a>,
        config: &PipelineConfig,
        progress: &dyn ProgressReporter,
    ) -> (ProcessingResult, PipelineContext<'a>) {
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.job.job_id,
            tenant = %ctx.job.tenant_key,
            filename = %ctx.job.filename,
        )
        .entered();

        let result = match self.run_stages(&mut ctx, config, progress) {
            Ok(()) => complete(&mut ctx, progress),
            Err(e) => fail(&mut ctx, e, progress),
        };
        (result, ctx)
    }

    fn run_stages(
        &self,
        ctx: &mut PipelineContext<'_>,
        config: &PipelineConfig,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let attachment = ctx.attachment;

        // parsing_email
        let data = {
            let _step = info_span!("parsing_email").entered();
            enter_stage(&mut ctx.job, progress, ProcessingStep::ParsingEmail);
            ctx.data.insert(TabularData::decode(
                &attachment.filename,
                &attachment.mime_type,
                &attachment.content,
            )?)
        };

        // analyzing_data
        {
            let _step = info_span!("analyzing_data").entered();
            enter_stage(&mut ctx.job, progress, ProcessingStep::AnalyzingData);
            if data.is_empty() {
                return Err(PipelineError::EmptyFile(attachment.filename.clone()));
            }
            let count = data.len() as u64;
            ctx.job.apply(&JobUpdate::new().records(count));
            progress.report(ProgressEvent::Records { count });
            debug!("{} records, columns: {}", count, data.headers.join(", "));
        }

        // applying_mappings
        {
            let _step = info_span!("applying_mappings").entered();
            enter_stage(&mut ctx.job, progress, ProcessingStep::ApplyingMappings);
            let report = apply_mappings(data, &config.column_mappings);
            for warning in &report.warnings {
                warn!("{}", warning);
            }
            ctx.warnings.extend(report.warnings.iter().cloned());
            ctx.mapping = Some(report);
            ctx.credentials = match &config.credentials {
                Some(source) => source.resolve_optional()?,
                None => None,
            };
        }

        // submitting_api, enriching_data, generating_results
        let summary = {
            let _step = info_span!("load_processor", processor = self.processor.name()).entered();
            enter_stage(&mut ctx.job, progress, ProcessingStep::SubmittingApi);

            let job_id = ctx.job.job_id.clone();
            let tenant_key = ctx.job.tenant_key.clone();
            let request = ProcessRequest {
                job_id: &job_id,
                tenant_key: &tenant_key,
                filename: &attachment.filename,
                data: &*data,
                credentials: ctx.credentials.as_ref(),
            };
            let job = &mut ctx.job;
            let mut on_phase = |phase: ProcessorPhase| enter_stage(job, progress, phase.step());
            self.processor.process(&request, &mut on_phase)?
        };
        enter_stage(&mut ctx.job, progress, ProcessingStep::GeneratingResults);

        ctx.warnings.extend(
            summary
                .warnings
                .iter()
                .cloned()
                .map(PipelineWarning::Processor),
        );
        ctx.summary = Some(summary);
        Ok(())
    }
}

/// Moves the job into `step` unless it is already there or further along.
fn enter_stage(job: &mut Job, progress: &dyn ProgressReporter, step: ProcessingStep) {
    if step <= job.current_step {
        debug!(
            "Job {}: ignoring stage {} (already at {})",
            job.job_id,
            step.as_str(),
            job.current_step.as_str()
        );
        return;
    }
    job.apply(&JobUpdate::stage(step, step.entry_percent()));
    progress.report(ProgressEvent::Stage {
        step,
        message: step.label().to_string(),
    });
}

fn complete(ctx: &mut PipelineContext<'_>, progress: &dyn ProgressReporter) -> ProcessingResult {
    let summary = ctx.summary.clone().unwrap_or_default();

    let mut result_data = match summary.summary_data {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("processor_summary".into(), other);
            map
        }
        None => Map::new(),
    };
    if let Some(report) = &ctx.mapping {
        result_data.insert("mapped_columns".into(), json!(report.applied.len()));
    }

    let update = JobUpdate::completed(summary.records_successful, summary.records_failed)
        .records(summary.records_processed)
        .result_data(Value::Object(result_data));
    ctx.job.apply(&update);

    let result = ProcessingResult::from_job(&ctx.job, &ctx.attachment.subject)
        .with_output_files(summary.output_files)
        .with_warnings(ctx.warnings.iter().map(ToString::to_string).collect());

    info!(
        "Processed {}: {} records, {} ok, {} failed",
        ctx.job.filename, ctx.job.record_count, ctx.job.success_count, ctx.job.failure_count
    );
    progress.report(ProgressEvent::Completed {
        update,
        result: result.clone(),
    });
    result
}

fn fail(
    ctx: &mut PipelineContext<'_>,
    error: PipelineError,
    progress: &dyn ProgressReporter,
) -> ProcessingResult {
    let step = ctx.job.current_step;
    let message = error.to_string();
    warn!(
        "Job {} failed during {}: {}",
        ctx.job.job_id,
        step.as_str(),
        message
    );

    let update = JobUpdate::failed(message).error_details(json!({
        "stage": step.as_str(),
        "error_type": error.kind(),
    }));
    ctx.job.apply(&update);

    let result = ProcessingResult::from_job(&ctx.job, &ctx.attachment.subject)
        .with_warnings(ctx.warnings.iter().map(ToString::to_string).collect());
    progress.report(ProgressEvent::Failed {
        step,
        update,
        result: result.clone(),
    });
    result
}
