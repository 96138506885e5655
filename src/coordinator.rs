use crate::{
    chunk_plan::{ChunkPlan, chunk},
    config::{Config, Mode},
    context::{ContextHandle, ExecutionHost, ThreadHost, guarded, spawn_context},
    delivery::{Delivery, FileDelivery},
    error::{GenerateError, Result},
    protocol::{Artifact, ArtifactHandle, Command, Status},
    render::{PdfRendererFactory, RendererFactory},
    report::{JobReport, ReportData, Row},
    util::{now_rfc3339, sha256_hex, validate_file_name},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type ProgressFn = Box<dyn FnMut(f32) + Send>;
pub type CompleteFn = Box<dyn FnMut(&ArtifactHandle) + Send>;

/// Per-call hooks for [`Coordinator::generate_with`].
#[derive(Default)]
pub struct JobOptions {
    on_progress: Option<ProgressFn>,
    on_complete: Option<CompleteFn>,
    cancel: Option<CancellationToken>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the applied fraction of chunks, zero or more times.
    pub fn on_progress(mut self, f: impl FnMut(f32) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Called once with the artifact reference, before delivery.
    pub fn on_complete(mut self, f: impl FnMut(&ArtifactHandle) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Drives report generation from raw [`ReportData`] to a delivered file.
pub struct Coordinator {
    cfg: Config,
    host: Arc<dyn ExecutionHost>,
    factory: Arc<dyn RendererFactory>,
    delivery: Arc<dyn Delivery>,
    jobs: AtomicUsize,
}

impl Coordinator {
    /// Threads for contexts, printpdf for rendering, files under
    /// `output.out_dir` for delivery.
    pub fn new(cfg: &Config) -> Self {
        let factory = PdfRendererFactory::new(&cfg.render, &cfg.sanitize);
        let delivery = FileDelivery::new(&cfg.output.out_dir, cfg.output.overwrite);
        Self::with_parts(cfg, Arc::new(ThreadHost), Arc::new(factory), Arc::new(delivery))
    }

    pub fn with_parts(
        cfg: &Config,
        host: Arc<dyn ExecutionHost>,
        factory: Arc<dyn RendererFactory>,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        Self {
            cfg: cfg.clone(),
            host,
            factory,
            delivery,
            jobs: AtomicUsize::new(0),
        }
    }

    pub async fn generate(&self, data: ReportData, file_name: &str) -> Result<JobReport> {
        self.generate_with(data, file_name, JobOptions::default()).await
    }

    pub async fn generate_with(
        &self,
        data: ReportData,
        file_name: &str,
        mut opts: JobOptions,
    ) -> Result<JobReport> {
        let started = now_rfc3339();
        let seq = self.jobs.fetch_add(1, Ordering::Relaxed);
        let job_id = sha256_hex(format!("{file_name}:{started}:{seq}").as_bytes())[..16].to_string();
        let mode = self.cfg.generation.mode;
        let chunk_size = self.cfg.generation.chunk_size;

        validate_file_name(file_name)?;
        data.validate(self.cfg.generation.strict_row_width)?;
        let plan = ChunkPlan::from_row_count(data.body.len(), chunk_size)?;

        info!(
            "job {job_id} created mode={mode} rows={} chunks={} file={file_name}",
            data.body.len(),
            plan.len()
        );

        let result = match mode {
            Mode::Direct => self.render_direct(&data, &mut opts),
            Mode::Chunked => self.run_chunked(&job_id, &data, &mut opts).await,
        };

        let artifact = match result {
            Ok(a) => a,
            Err(e) => {
                warn!("job {job_id} failed: {e}");
                return Err(e);
            }
        };

        let handle = ArtifactHandle::for_job(&job_id, &artifact);
        if let Some(cb) = opts.on_complete.as_mut() {
            cb(&handle);
        }

        let delivered_to = self
            .delivery
            .deliver(file_name, &artifact)
            .map_err(|e| GenerateError::Delivery(format!("{e:#}")))?;

        info!(
            "job {job_id} completed pages={} bytes={} -> {delivered_to}",
            artifact.pages,
            artifact.len()
        );

        Ok(JobReport {
            job_id,
            file_name: file_name.to_string(),
            mode,
            body_rows: artifact.body_rows,
            chunk_count: match mode {
                Mode::Direct => 1,
                Mode::Chunked => plan.len(),
            },
            chunk_size,
            pages: artifact.pages,
            artifact_bytes: artifact.len(),
            artifact_sha256: artifact.sha256(),
            delivered_to,
            started,
            finished: now_rfc3339(),
        })
    }

    /// Single call on the caller's task; no chunking, no context. The job
    /// timeout does not apply here. Cancellation is checked before and after
    /// the render.
    fn render_direct(&self, data: &ReportData, opts: &mut JobOptions) -> Result<Artifact> {
        if opts.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }
        let artifact = guarded(|| {
            let mut renderer = self.factory.create()?;
            renderer.start(&data.header, &data.footer)?;
            renderer.append_table(&data.header, &data.body, &data.footer)?;
            renderer.finalize()
        })
        .map_err(GenerateError::RenderFailure)?;
        if opts.is_cancelled() {
            return Err(GenerateError::Cancelled);
        }
        if let Some(cb) = opts.on_progress.as_mut() {
            cb(1.0);
        }
        Ok(artifact)
    }

    async fn run_chunked(
        &self,
        job_id: &str,
        data: &ReportData,
        opts: &mut JobOptions,
    ) -> Result<Artifact> {
        self.host
            .available()
            .map_err(GenerateError::UnsupportedEnvironment)?;

        let batches = chunk(&data.body, self.cfg.generation.chunk_size)?;
        let name = format!("{}-{job_id}", self.cfg.worker.thread_name_prefix);
        let ctx = spawn_context(
            self.host.as_ref(),
            self.factory.clone(),
            name,
            self.cfg.worker.queue_capacity,
        )?;

        let timeout_secs = self.cfg.generation.job_timeout_seconds;
        let cancel = opts.cancel.clone();
        let outcome = {
            let exchange = self.exchange(&ctx, data, batches, opts);
            let bounded = async {
                if timeout_secs > 0 {
                    tokio::time::timeout(Duration::from_secs(timeout_secs), exchange)
                        .await
                        .unwrap_or(Err(GenerateError::Timeout(timeout_secs)))
                } else {
                    exchange.await
                }
            };
            match cancel {
                Some(token) => tokio::select! {
                    r = bounded => r,
                    _ = token.cancelled() => Err(GenerateError::Cancelled),
                },
                None => bounded.await,
            }
        };

        // A stuck or cancelled context is left to finish on its own thread.
        let wait = !matches!(
            outcome,
            Err(GenerateError::Timeout(_)) | Err(GenerateError::Cancelled)
        );
        let reason = ctx.teardown(wait).await;

        match outcome {
            Err(GenerateError::WorkerFailure(msg)) => {
                Err(GenerateError::WorkerFailure(reason.unwrap_or(msg)))
            }
            other => {
                if let Some(reason) = reason {
                    warn!("job {job_id} context ended abnormally: {reason}");
                }
                other
            }
        }
    }

    /// Sends the job and listens for statuses at the same time; the first
    /// terminal status decides the outcome.
    async fn exchange(
        &self,
        ctx: &ContextHandle,
        data: &ReportData,
        batches: Vec<Vec<Row>>,
        opts: &mut JobOptions,
    ) -> Result<Artifact> {
        let cancel = opts.cancel.clone();
        let dispatch = dispatch(ctx, data, batches, cancel.as_ref());
        let listen = listen(ctx, opts.on_progress.as_mut());
        tokio::pin!(dispatch);
        tokio::pin!(listen);

        let mut sent = false;
        loop {
            tokio::select! {
                r = &mut dispatch, if !sent => {
                    sent = true;
                    match r {
                        Ok(()) => debug!("[{}] all messages sent, awaiting completion", ctx.name()),
                        Err(GenerateError::Cancelled) => return Err(GenerateError::Cancelled),
                        // The listener reports why the context went away.
                        Err(e) => warn!("[{}] dispatch stopped: {e}", ctx.name()),
                    }
                }
                r = &mut listen => return r,
            }
        }
    }
}

async fn dispatch(
    ctx: &ContextHandle,
    data: &ReportData,
    batches: Vec<Vec<Row>>,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    debug!("[{}] dispatching", ctx.name());
    ctx.send(Command::Begin {
        header: data.header.clone(),
        footer: data.footer.clone(),
        total_chunks: batches.len(),
    })
    .await?;

    for (index, rows) in batches.into_iter().enumerate() {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(GenerateError::Cancelled);
        }
        // Give the runtime a turn between chunks.
        tokio::task::yield_now().await;
        let n = rows.len();
        ctx.send(Command::Chunk {
            index,
            rows,
            header: data.header.clone(),
            footer: data.footer.clone(),
        })
        .await?;
        debug!("[{}] sent chunk {index} ({n} rows)", ctx.name());
    }

    ctx.send(Command::Done).await
}

async fn listen(ctx: &ContextHandle, mut on_progress: Option<&mut ProgressFn>) -> Result<Artifact> {
    loop {
        match ctx.recv().await {
            Some(Status::Processing { progress }) => {
                if let (Some(p), Some(cb)) = (progress, on_progress.as_mut()) {
                    cb(p);
                }
            }
            Some(Status::Completed { artifact }) => return Ok(artifact),
            Some(Status::Error { message }) => return Err(GenerateError::RenderFailure(message)),
            None => {
                return Err(GenerateError::WorkerFailure(format!(
                    "{} exited without a terminal status",
                    ctx.name()
                )));
            }
        }
    }
}
