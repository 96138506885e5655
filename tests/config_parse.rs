use ledger_pdf::config::{Config, Mode};

#[test]
fn parse_example_config() {
    let raw = include_str!("../ledger-pdf.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.generation.mode, Mode::Chunked);
    assert_eq!(cfg.generation.chunk_size, 1000);
    assert!(cfg.worker.queue_capacity >= 1);
    assert!(!cfg.output.out_dir.is_empty());
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let cfg: Config = toml::from_str(
        r#"
[generation]
mode = "direct"
chunk_size = 50
job_timeout_seconds = 0
strict_row_width = false
"#,
    )
    .expect("parse TOML");
    assert_eq!(cfg.generation.mode, Mode::Direct);
    assert_eq!(cfg.render.header_fill, [47, 46, 121]);
    assert_eq!(cfg.logging.level, "info");
}
