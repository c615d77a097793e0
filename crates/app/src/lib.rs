use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::info;

use flowcap_core::config::ExtractConfig;
use flowcap_core::error::ErrorKind;
use flowcap_core::logging::{self, LoggingOptions};
use flowcap_core::pipeline::{self, PipelineState};

#[derive(Parser)]
#[command(
    name = "extract-flow",
    about = "Batch optical-flow extraction over a directory of videos"
)]
struct Cli {
    #[arg(help = "Path to the ONNX flow model weights")]
    weights: PathBuf,

    #[arg(help = "Path to the network manifest template")]
    template: PathBuf,

    #[arg(help = "Directory of input video files")]
    input_dir: PathBuf,

    #[arg(help = "Directory to write per-video flow output under")]
    output_dir: PathBuf,

    #[arg(long, value_name = "N", help = "Flow truncation bound for quantization")]
    bound: Option<f32>,

    #[arg(long, value_name = "N", help = "GPU device index")]
    gpu: Option<i32>,

    #[arg(long, value_name = "BACKEND", help = "Execution backend: cuda or tensorrt")]
    backend: Option<String>,

    #[arg(
        long = "nan-policy",
        value_name = "POLICY",
        help = "What to do when all inference attempts produce NaNs: use-anyway or abort"
    )]
    nan_policy: Option<String>,

    #[arg(long, value_name = "FILE", help = "Optional TOML config file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LoggingOptions {
        verbose: cli.verbose,
        cli_log_filter: cli.log_filter.clone(),
        rust_log_env: std::env::var("RUST_LOG").ok(),
    });
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    validate_input_path(&cli.weights, "model weights")?;
    validate_input_path(&cli.template, "network template")?;
    validate_input_dir(&cli.input_dir)?;

    let config = resolve_config(&cli)?;
    let (lower, upper) = config.quantization_range()?;

    info!(
        weights = %cli.weights.display(),
        template = %cli.template.display(),
        input = %cli.input_dir.display(),
        output = %cli.output_dir.display(),
        backend = %config.backend(),
        gpu = config.gpu,
        bound = config.bound,
        "starting flow extraction"
    );

    std::fs::create_dir_all(&cli.output_dir)
        .context(ErrorKind::Configuration)
        .with_context(|| {
            format!(
                "cannot create output directory: {}",
                cli.output_dir.display()
            )
        })?;

    let mut state = PipelineState::new(
        cli.template.clone(),
        cli.weights.clone(),
        config.backend(),
        config.gpu,
        config.trt_cache_dir.clone(),
        config.nan_policy(),
    );

    pipeline::extract_directory(&cli.input_dir, &cli.output_dir, &mut state, lower, upper)?;
    Ok(())
}

/// Load the optional config file, then apply CLI flag overrides on top.
fn resolve_config(cli: &Cli) -> Result<ExtractConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            if !path.exists() {
                return Err(anyhow::Error::new(ErrorKind::Configuration))
                    .with_context(|| format!("config file does not exist: {}", path.display()));
            }
            ExtractConfig::load_from_path(path)?
        }
        None => ExtractConfig::default(),
    };

    if let Some(bound) = cli.bound {
        config.bound = bound;
    }
    if let Some(gpu) = cli.gpu {
        config.gpu = gpu;
    }
    if let Some(backend) = &cli.backend {
        config.backend = backend.clone();
    }
    if let Some(nan_policy) = &cli.nan_policy {
        config.nan_policy = nan_policy.clone();
    }

    Ok(config)
}

fn validate_input_path(path: &Path, what: &str) -> Result<()> {
    if !path.is_file() {
        return Err(anyhow::Error::new(ErrorKind::Configuration))
            .with_context(|| format!("{what} file does not exist: {}", path.display()));
    }
    Ok(())
}

fn validate_input_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(anyhow::Error::new(ErrorKind::Configuration))
            .with_context(|| format!("input directory does not exist: {}", path.display()));
    }
    Ok(())
}


#[cfg(test)]
mod resolve_config_tests {
    use super::*;
    use flowcap_core::backend::InferenceBackend;
    use flowcap_core::infer::NanPolicy;

    fn base_cli() -> Cli {
        Cli::parse_from(["extract-flow", "m.onnx", "n.json", "in/", "out/"])
    }

    #[test]
    fn defaults_without_config_file() {
        let config = resolve_config(&base_cli()).unwrap();
        assert_eq!(config, ExtractConfig::default());
    }

    #[test]
    fn cli_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extract.toml");
        std::fs::write(&path, "bound = 10.0\ngpu = 3\nbackend = \"tensorrt\"\n").unwrap();

        let mut cli = base_cli();
        cli.config = Some(path);
        cli.bound = Some(25.0);
        cli.nan_policy = Some("abort".to_string());

        let config = resolve_config(&cli).unwrap();
        // flag wins over file
        assert_eq!(config.bound, 25.0);
        assert_eq!(config.nan_policy(), NanPolicy::Abort);
        // file wins over default
        assert_eq!(config.gpu, 3);
        assert_eq!(config.backend(), InferenceBackend::Tensorrt);
    }

    #[test]
    fn explicit_missing_config_file_is_an_error() {
        let mut cli = base_cli();
        cli.config = Some(PathBuf::from("/nonexistent/extract.toml"));
        let err = resolve_config(&cli).unwrap_err();
        assert_eq!(
            flowcap_core::error::kind_of(&err),
            Some(ErrorKind::Configuration)
        );
    }
}
