//! Runs one job for one scheduled instance.

use crate::error::LoadError;
use crate::job::Job;
use crate::pipeline::{PipelineSummary, RunMetadata, UpsertPipeline};
use crate::source::{ExtractRequest, SourceConnector};
use crate::transport::{Endpoint, Transport, TransportHandle};
use crate::watermark::{wait_for_quiescence, InstanceTiming, WatermarkResolver};
use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn, Instrument};
use weir_protocol::{JobId, RunId, Watermark};
use weir_schedule::CancellationToken;
use weir_sinks::{StoreConnector, TargetStore};

/// Per-instance execution state. Built fresh for every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: RunId,
    pub timing: InstanceTiming,
    pub executed_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(run_id: RunId, timing: InstanceTiming) -> Self {
        Self {
            run_id,
            timing,
            executed_at: Utc::now(),
        }
    }
}

/// Collaborators for a run. Endpoints are the configured addresses; the
/// connectors only ever see the addresses returned by the open transports.
pub struct RunDeps<'a> {
    pub source: &'a dyn SourceConnector,
    pub source_endpoint: Endpoint,
    pub source_transport: &'a dyn Transport,
    pub stores: &'a dyn StoreConnector,
    pub target_endpoint: Endpoint,
    pub target_transport: &'a dyn Transport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job_id: JobId,
    pub run_id: RunId,
    pub watermark: Watermark,
    pub target_existed: bool,
    pub chunks: u32,
    pub rows_written: u64,
    pub indexes: Vec<String>,
}

pub struct Runner;

impl Runner {
    /// Extract and load `job` for one instance. Transports are opened here
    /// and closed before this returns, whatever the outcome.
    pub async fn run(
        job: &Job,
        ctx: &RunContext,
        deps: &RunDeps<'_>,
        cancel: &CancellationToken,
    ) -> Result<RunReport, LoadError> {
        let span = info_span!(
            "instance",
            job_id = %job.job_id(),
            execution_ts = %ctx.timing.execution_ts,
            run_id = %ctx.run_id
        );
        async move {
            if cancel.is_cancelled() {
                return Err(LoadError::Cancelled);
            }

            let target = deps.target_transport.open(&deps.target_endpoint).await?;
            let source = match deps.source_transport.open(&deps.source_endpoint).await {
                Ok(source) => source,
                Err(err) => {
                    close_quietly(target).await;
                    return Err(err.into());
                }
            };

            let result = load(
                job,
                ctx,
                deps,
                target.endpoint(),
                source.endpoint(),
                cancel,
            )
            .await;

            match result {
                Ok(report) => {
                    let source_closed = source.close().await;
                    let target_closed = target.close().await;
                    source_closed?;
                    target_closed?;
                    info!(
                        chunks = report.chunks,
                        rows = report.rows_written,
                        "instance loaded"
                    );
                    Ok(report)
                }
                Err(err) => {
                    close_quietly(source).await;
                    close_quietly(target).await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

async fn close_quietly(handle: Box<dyn TransportHandle>) {
    if let Err(err) = handle.close().await {
        warn!("failed to close transport: {}", err);
    }
}

async fn load(
    job: &Job,
    ctx: &RunContext,
    deps: &RunDeps<'_>,
    target_endpoint: &Endpoint,
    source_endpoint: &Endpoint,
    cancel: &CancellationToken,
) -> Result<RunReport, LoadError> {
    let mut store = deps
        .stores
        .connect(&target_endpoint.url)
        .await
        .map_err(LoadError::Store)?;

    let result = load_into(job, ctx, deps.source, source_endpoint, store.as_mut(), cancel).await;
    match store.close().await {
        Ok(()) => result,
        Err(close_err) => match result {
            Ok(_) => Err(LoadError::Store(close_err)),
            Err(err) => {
                warn!("failed to close target store: {}", close_err);
                Err(err)
            }
        },
    }
}

async fn load_into(
    job: &Job,
    ctx: &RunContext,
    source: &dyn SourceConnector,
    source_endpoint: &Endpoint,
    store: &mut dyn TargetStore,
    cancel: &CancellationToken,
) -> Result<RunReport, LoadError> {
    let target_existed = store.table_exists(job.target()).await.map_err(LoadError::Store)?;
    let watermark = WatermarkResolver::resolve(job, &ctx.timing, target_existed);
    info!(
        from = ?watermark.from,
        until = ?watermark.until,
        target_existed,
        "resolved watermark"
    );

    if let Some(deadline) = WatermarkResolver::quiescence_deadline(job, &watermark) {
        wait_for_quiescence(deadline, cancel).await?;
    }

    let request = match job.key() {
        Some(key) => ExtractRequest::Key(key.to_string()),
        None => ExtractRequest::Window(watermark),
    };

    let meta = RunMetadata {
        executed_at: ctx.executed_at,
        job_id: job.job_id().clone(),
        run_id: ctx.run_id.clone(),
        execution_ts: ctx.timing.execution_ts,
        next_execution_ts: ctx.timing.next_execution_ts,
        watermark,
    };
    let mut pipeline = UpsertPipeline::new(job, store, meta);

    let mut reader = match source.extract(source_endpoint, &request).await {
        Ok(reader) => reader,
        Err(err) => return abort(pipeline, err.into()).await,
    };

    loop {
        if cancel.is_cancelled() {
            return abort(pipeline, LoadError::Cancelled).await;
        }
        let batch = match reader.next_batch().await {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(err) => return abort(pipeline, err.into()).await,
        };
        if let Err(err) = pipeline.submit(batch, None).await {
            return abort(pipeline, err).await;
        }
    }

    let PipelineSummary {
        chunks,
        rows_written,
        indexes,
    } = pipeline.finish().await?;

    Ok(RunReport {
        job_id: job.job_id().clone(),
        run_id: ctx.run_id.clone(),
        watermark,
        target_existed,
        chunks,
        rows_written,
        indexes,
    })
}

async fn abort<T>(pipeline: UpsertPipeline<'_>, err: LoadError) -> Result<T, LoadError> {
    warn!("aborting instance: {}", err);
    if let Err(rollback_err) = pipeline.abort().await {
        warn!("rollback failed: {}", rollback_err);
    }
    Err(err)
}
