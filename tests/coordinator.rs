use ledger_pdf::{
    Cell, Config, Coordinator, GenerateError, JobOptions, Mode, ReportData,
    context::{ContextOutcome, ContextTask, ExecutionHost, ThreadHost},
    delivery::Delivery,
    protocol::Artifact,
    render::{PdfRendererFactory, Renderer, RendererFactory},
    report::Row,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Log {
    starts: usize,
    chunk_rows: Vec<Vec<Row>>,
    dropped: bool,
}

#[derive(Clone, Copy)]
enum Failure {
    Bail,
    Panic,
    /// Panics with a payload that panics again when dropped, which takes the
    /// whole context thread down.
    KillThread,
}

struct ExplodesOnDrop;

impl Drop for ExplodesOnDrop {
    fn drop(&mut self) {
        panic!("context thread lost");
    }
}

/// Records every call; optionally fails on a given chunk or sleeps.
#[derive(Clone, Default)]
struct RecordingFactory {
    log: Arc<Mutex<Log>>,
    fail_on_chunk: Option<(usize, Failure)>,
    delay: Option<Duration>,
}

struct RecordingRenderer {
    log: Arc<Mutex<Log>>,
    fail_on_chunk: Option<(usize, Failure)>,
    delay: Option<Duration>,
    rows: usize,
}

impl RendererFactory for RecordingFactory {
    fn create(&self) -> anyhow::Result<Box<dyn Renderer>> {
        Ok(Box::new(RecordingRenderer {
            log: self.log.clone(),
            fail_on_chunk: self.fail_on_chunk,
            delay: self.delay,
            rows: 0,
        }))
    }
}

impl Renderer for RecordingRenderer {
    fn start(&mut self, _header: &[String], _footer: &[String]) -> anyhow::Result<()> {
        self.log.lock().unwrap().starts += 1;
        Ok(())
    }

    fn append_table(&mut self, _h: &[String], rows: &[Row], _f: &[String]) -> anyhow::Result<()> {
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        let mut log = self.log.lock().unwrap();
        match self.fail_on_chunk {
            Some((n, failure)) if n == log.chunk_rows.len() => {
                drop(log);
                match failure {
                    Failure::Bail => anyhow::bail!("cell overflow"),
                    Failure::Panic => panic!("glyph table corrupted"),
                    Failure::KillThread => std::panic::panic_any(ExplodesOnDrop),
                }
            }
            _ => {}
        }
        log.chunk_rows.push(rows.to_vec());
        self.rows += rows.len();
        Ok(())
    }

    fn finalize(&mut self) -> anyhow::Result<Artifact> {
        Ok(Artifact {
            bytes: b"%PDF-fake".to_vec(),
            body_rows: self.rows,
            pages: 1,
        })
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        self.rows = 0;
        Ok(())
    }
}

impl Drop for RecordingRenderer {
    fn drop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.dropped = true;
        }
    }
}

#[derive(Default)]
struct MemoryDelivery {
    files: Mutex<Vec<(String, Artifact)>>,
}

impl Delivery for MemoryDelivery {
    fn deliver(&self, file_name: &str, artifact: &Artifact) -> anyhow::Result<String> {
        self.files
            .lock()
            .unwrap()
            .push((file_name.to_string(), artifact.clone()));
        Ok(format!("memory://{file_name}"))
    }
}

/// A host without background execution.
#[derive(Default)]
struct NoThreads {
    spawned: AtomicUsize,
}

impl ExecutionHost for NoThreads {
    fn available(&self) -> Result<(), String> {
        Err("single-threaded host".into())
    }

    fn spawn(&self, name: String, task: ContextTask) -> std::io::Result<JoinHandle<ContextOutcome>> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        ThreadHost.spawn(name, task)
    }
}

struct BrokenFactory;

impl RendererFactory for BrokenFactory {
    fn create(&self) -> anyhow::Result<Box<dyn Renderer>> {
        anyhow::bail!("font table missing")
    }
}

fn numbered(n: usize) -> ReportData {
    ReportData::new(
        vec!["#".into(), "memo".into()],
        (0..n)
            .map(|i| vec![Cell::Number(i as f64), Cell::Text(format!("row {i}"))])
            .collect(),
        vec!["total".into(), n.to_string()],
    )
}

fn scenario() -> ReportData {
    ReportData::new(
        vec!["A".into(), "B".into()],
        vec![
            vec![1i64.into(), "x".into()],
            vec![2i64.into(), "y".into()],
            vec![3i64.into(), "z".into()],
        ],
        vec!["sum".into(), "-".into()],
    )
}

fn config(chunk_size: usize) -> Config {
    let mut cfg = Config::default();
    cfg.generation.chunk_size = chunk_size;
    cfg
}

fn coordinator(
    cfg: &Config,
    factory: impl RendererFactory + 'static,
) -> (Coordinator, Arc<MemoryDelivery>) {
    let delivery = Arc::new(MemoryDelivery::default());
    let c = Coordinator::with_parts(cfg, Arc::new(ThreadHost), Arc::new(factory), delivery.clone());
    (c, delivery)
}

#[tokio::test]
async fn chunks_arrive_in_order_and_one_artifact_is_delivered() {
    let factory = RecordingFactory::default();
    let log = factory.log.clone();
    let (c, delivery) = coordinator(&config(2), factory);

    let report = c.generate(scenario(), "scenario.pdf").await.unwrap();

    assert_eq!(report.body_rows, 3);
    assert_eq!(report.chunk_count, 2);
    let log = log.lock().unwrap();
    assert_eq!(log.starts, 1);
    assert_eq!(log.chunk_rows.len(), 2);
    assert_eq!(log.chunk_rows[0], scenario().body[..2].to_vec());
    assert_eq!(log.chunk_rows[1], scenario().body[2..].to_vec());
    assert!(log.dropped, "context must be torn down");

    let files = delivery.files.lock().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].0, "scenario.pdf");
    assert_eq!(files[0].1.body_rows, 3);
}

#[tokio::test]
async fn many_chunks_keep_order() {
    let factory = RecordingFactory::default();
    let log = factory.log.clone();
    let (c, _) = coordinator(&config(3), factory);

    c.generate(numbered(100), "big.pdf").await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.chunk_rows.len(), 34);
    let flat: Vec<Row> = log.chunk_rows.concat();
    assert_eq!(flat, numbered(100).body);
}

#[tokio::test]
async fn empty_body_still_completes() {
    let factory = RecordingFactory::default();
    let log = factory.log.clone();
    let (c, delivery) = coordinator(&config(1000), factory);

    let data = ReportData::new(vec!["A".into()], vec![], vec!["end".into()]);
    let report = c.generate(data, "empty.pdf").await.unwrap();

    assert_eq!(report.body_rows, 0);
    assert_eq!(report.chunk_count, 0);
    assert_eq!(log.lock().unwrap().starts, 1);
    assert_eq!(delivery.files.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn render_error_rejects_and_delivers_nothing() {
    let factory = RecordingFactory {
        fail_on_chunk: Some((1, Failure::Bail)),
        ..Default::default()
    };
    let log = factory.log.clone();
    let (c, delivery) = coordinator(&config(1), factory);

    let err = c.generate(scenario(), "broken.pdf").await.unwrap_err();

    match err {
        GenerateError::RenderFailure(msg) => assert!(msg.contains("cell overflow"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(delivery.files.lock().unwrap().is_empty());
    assert!(log.lock().unwrap().dropped, "context must be torn down");
}

#[tokio::test]
async fn unsupported_host_fails_before_any_context() {
    let host = Arc::new(NoThreads::default());
    let delivery = Arc::new(MemoryDelivery::default());
    let c = Coordinator::with_parts(
        &config(2),
        host.clone(),
        Arc::new(RecordingFactory::default()),
        delivery.clone(),
    );

    let err = c.generate(scenario(), "x.pdf").await.unwrap_err();

    assert!(matches!(err, GenerateError::UnsupportedEnvironment(_)));
    assert_eq!(host.spawned.load(Ordering::SeqCst), 0);
    assert!(delivery.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn direct_mode_needs_no_background_host() {
    let mut cfg = config(2);
    cfg.generation.mode = Mode::Direct;
    let factory = RecordingFactory::default();
    let log = factory.log.clone();
    let delivery = Arc::new(MemoryDelivery::default());
    let c = Coordinator::with_parts(
        &cfg,
        Arc::new(NoThreads::default()),
        Arc::new(factory),
        delivery.clone(),
    );

    let report = c.generate(scenario(), "direct.pdf").await.unwrap();

    assert_eq!(report.mode, Mode::Direct);
    assert_eq!(report.body_rows, 3);
    // One call with the whole body.
    assert_eq!(log.lock().unwrap().chunk_rows.len(), 1);
}

#[tokio::test]
async fn context_that_cannot_start_is_a_worker_failure() {
    let (c, delivery) = coordinator(&config(2), BrokenFactory);

    let err = c.generate(scenario(), "x.pdf").await.unwrap_err();

    match err {
        GenerateError::WorkerFailure(msg) => assert!(msg.contains("font table missing"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(delivery.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_input_is_rejected_before_dispatch() {
    let factory = RecordingFactory::default();
    let log = factory.log.clone();
    let (c, _) = coordinator(&config(0), factory);
    assert!(matches!(
        c.generate(scenario(), "x.pdf").await,
        Err(GenerateError::InvalidArgument(_))
    ));

    let (c, _) = coordinator(&config(2), RecordingFactory {
        log: log.clone(),
        ..Default::default()
    });
    let mut ragged = scenario();
    ragged.body[1].pop();
    assert!(matches!(
        c.generate(ragged, "x.pdf").await,
        Err(GenerateError::InvalidArgument(_))
    ));
    assert!(matches!(
        c.generate(scenario(), "../x.pdf").await,
        Err(GenerateError::InvalidArgument(_))
    ));
    assert_eq!(log.lock().unwrap().starts, 0);
}

#[tokio::test]
async fn progress_and_completion_callbacks() {
    let (c, delivery) = coordinator(&config(10), RecordingFactory::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handles = Arc::new(Mutex::new(Vec::new()));
    let delivered_before_callback = Arc::new(AtomicBool::new(false));

    let opts = {
        let seen = seen.clone();
        let handles = handles.clone();
        let delivery = delivery.clone();
        let flag = delivered_before_callback.clone();
        JobOptions::new()
            .on_progress(move |p| seen.lock().unwrap().push(p))
            .on_complete(move |h| {
                if !delivery.files.lock().unwrap().is_empty() {
                    flag.store(true, Ordering::SeqCst);
                }
                handles.lock().unwrap().push(h.clone());
            })
    };

    c.generate_with(numbered(45), "p.pdf", opts).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(*seen.last().unwrap(), 1.0);

    let handles = handles.lock().unwrap();
    assert_eq!(handles.len(), 1);
    assert!(handles[0].uri.starts_with("artifact://"));
    assert!(!delivered_before_callback.load(Ordering::SeqCst));
}

#[tokio::test]
async fn slow_context_times_out() {
    let mut cfg = config(1);
    cfg.generation.job_timeout_seconds = 1;
    let factory = RecordingFactory {
        delay: Some(Duration::from_millis(1500)),
        ..Default::default()
    };
    let (c, delivery) = coordinator(&cfg, factory);

    let err = c.generate(scenario(), "slow.pdf").await.unwrap_err();

    assert_eq!(err, GenerateError::Timeout(1));
    assert!(delivery.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_job_delivers_nothing() {
    let (c, delivery) = coordinator(&config(1), RecordingFactory::default());
    let token = CancellationToken::new();
    token.cancel();

    let err = c
        .generate_with(numbered(20), "c.pdf", JobOptions::new().cancel_with(token))
        .await
        .unwrap_err();

    assert_eq!(err, GenerateError::Cancelled);
    assert!(delivery.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn real_pdf_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(2);
    cfg.output.out_dir = dir.path().display().to_string();
    let c = Coordinator::new(&cfg);

    let report = c.generate(scenario(), "ledger.pdf").await.unwrap();

    let bytes = std::fs::read(dir.path().join("ledger.pdf")).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(report.artifact_bytes, bytes.len());
    assert_eq!(report.body_rows, 3);
    assert_eq!(report.chunk_count, 2);
}

#[tokio::test]
async fn direct_and_chunked_render_the_same_rows() {
    let data = numbered(250);
    let factory = PdfRendererFactory::new(&Config::default().render, &Config::default().sanitize);

    let mut direct_cfg = config(100);
    direct_cfg.generation.mode = Mode::Direct;
    let (direct, _) = coordinator(&direct_cfg, factory.clone());
    let (chunked, _) = coordinator(&config(100), factory);

    let a = direct.generate(data.clone(), "a.pdf").await.unwrap();
    let b = chunked.generate(data, "b.pdf").await.unwrap();
    assert_eq!(a.body_rows, 250);
    assert_eq!(b.body_rows, 250);
    assert_eq!(a.pages, b.pages);
}

#[tokio::test]
async fn renderer_panic_in_chunked_mode_is_a_render_failure() {
    let factory = RecordingFactory {
        fail_on_chunk: Some((0, Failure::Panic)),
        ..Default::default()
    };
    let (c, delivery) = coordinator(&config(2), factory);

    match c.generate(scenario(), "p.pdf").await {
        Err(GenerateError::RenderFailure(msg)) => {
            assert!(msg.contains("glyph table corrupted"), "{msg}")
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(delivery.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn direct_mode_render_error_rejects() {
    for (failure, expected) in [
        (Failure::Bail, "cell overflow"),
        (Failure::Panic, "glyph table corrupted"),
    ] {
        let mut cfg = config(2);
        cfg.generation.mode = Mode::Direct;
        let factory = RecordingFactory {
            fail_on_chunk: Some((0, failure)),
            ..Default::default()
        };
        let (c, delivery) = coordinator(&cfg, factory);
        let progress = Arc::new(AtomicUsize::new(0));
        let opts = {
            let progress = progress.clone();
            JobOptions::new().on_progress(move |_| {
                progress.fetch_add(1, Ordering::SeqCst);
            })
        };

        match c.generate_with(scenario(), "d.pdf", opts).await {
            Err(GenerateError::RenderFailure(msg)) => assert!(msg.contains(expected), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(delivery.files.lock().unwrap().is_empty());
        assert_eq!(progress.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn cancelled_direct_job_never_renders() {
    let mut cfg = config(2);
    cfg.generation.mode = Mode::Direct;
    let factory = RecordingFactory::default();
    let log = factory.log.clone();
    let (c, delivery) = coordinator(&cfg, factory);
    let token = CancellationToken::new();
    token.cancel();

    let err = c
        .generate_with(scenario(), "d.pdf", JobOptions::new().cancel_with(token))
        .await
        .unwrap_err();

    assert_eq!(err, GenerateError::Cancelled);
    assert!(log.lock().unwrap().chunk_rows.is_empty());
    assert!(delivery.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn context_dying_mid_job_is_a_worker_failure() {
    let factory = RecordingFactory {
        fail_on_chunk: Some((1, Failure::KillThread)),
        ..Default::default()
    };
    let log = factory.log.clone();
    let (c, delivery) = coordinator(&config(1), factory);

    match c.generate(scenario(), "k.pdf").await {
        Err(GenerateError::WorkerFailure(msg)) => {
            assert!(msg.contains("context thread lost"), "{msg}")
        }
        other => panic!("unexpected {other:?}"),
    }
    let log = log.lock().unwrap();
    assert_eq!(log.starts, 1);
    assert_eq!(log.chunk_rows.len(), 1);
    assert!(log.dropped, "context must be torn down");
    assert!(delivery.files.lock().unwrap().is_empty());
}
