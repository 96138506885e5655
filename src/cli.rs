use crate::{
    chunk_plan::ChunkPlan,
    config::{Config, Mode},
    coordinator::{Coordinator, JobOptions},
    report::ReportData,
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ledger-pdf")]
#[command(about = "Render transaction reports to PDF on a background render context")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./ledger-pdf.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate and deliver a PDF.
    Render {
        #[arg(long)]
        input: PathBuf,
        /// Delivered file name; defaults to the input stem with .pdf.
        #[arg(long)]
        file_name: Option<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long, value_enum)]
        mode: Option<Mode>,
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Print how the body would be chunked.
    Plan {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Validate the report shape.
    Check {
        #[arg(long)]
        input: PathBuf,
    },
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = match cfg_path {
        Some(p) => Config::load(&p)?,
        None => Config::default(),
    };
    let _guard = init_logging(&args, &cfg)?;

    match &args.cmd {
        Command::Render {
            input,
            file_name,
            out_dir,
            mode,
            chunk_size,
        } => {
            let mut cfg = cfg.clone();
            if let Some(m) = mode {
                cfg.generation.mode = *m;
            }
            if let Some(n) = chunk_size {
                cfg.generation.chunk_size = *n;
            }
            if let Some(dir) = out_dir {
                cfg.output.out_dir = dir.display().to_string();
            }
            render(&cfg, input, file_name.as_deref()).await
        }
        Command::Plan { input, chunk_size } => {
            let data = ReportData::from_json_file(input)?;
            let size = chunk_size.unwrap_or(cfg.generation.chunk_size);
            let plan = ChunkPlan::from_row_count(data.body.len(), size)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Command::Check { input } => check(&cfg, input),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("ledger-pdf.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let file_path = (cfg.logging.write_to_file).then(|| {
        if cfg.logging.file_path.is_empty() {
            Path::new(&cfg.output.out_dir).join("ledger-pdf.log")
        } else {
            PathBuf::from(&cfg.logging.file_path)
        }
    });

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(&path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

async fn render(cfg: &Config, input: &Path, file_name: Option<&str>) -> Result<()> {
    let data = ReportData::from_json_file(input)?;
    let file_name = match file_name {
        Some(n) => n.to_string(),
        None => default_file_name(input)?,
    };

    let coordinator = Coordinator::new(cfg);
    let opts = JobOptions::new()
        .on_progress(|p| debug!("progress {:.0}%", p * 100.0))
        .on_complete(|h| info!("artifact ready: {} ({} bytes)", h.uri, h.byte_len));

    let report = coordinator
        .generate_with(data, &file_name, opts)
        .await
        .with_context(|| format!("generating {file_name}"))?;

    let summary = serde_json::to_string_pretty(&report)?;
    if cfg.output.write_report_json {
        let path = Path::new(&cfg.output.out_dir)
            .join(format!("{}{}", file_name, cfg.output.report_suffix));
        std::fs::write(&path, &summary)
            .with_context(|| format!("writing report: {}", path.display()))?;
    }
    println!("{summary}");
    Ok(())
}

fn check(cfg: &Config, input: &Path) -> Result<()> {
    let data = ReportData::from_json_file(input)?;
    data.validate(cfg.generation.strict_row_width)
        .with_context(|| format!("validating {}", input.display()))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "columns": data.width(),
            "body_rows": data.body.len(),
            "has_footer": !data.footer.is_empty(),
            "status": "ok"
        }))?
    );
    Ok(())
}

fn default_file_name(input: &Path) -> Result<String> {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("cannot derive a file name from {}", input.display()))?;
    Ok(format!("{stem}.pdf"))
}
