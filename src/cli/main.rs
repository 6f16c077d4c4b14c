//! Background removal server CLI
//!
//! Parses flags, prepares the model and runs the HTTP server until shutdown.

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache, DEFAULT_MODEL_URL},
    config::{ExecutionProvider, DEFAULT_GZIP_MIN_SIZE, DEFAULT_MAX_DIMENSION},
    download::{is_url, validate_model_url, ModelDownloader},
    models::{ModelSource, ModelSpec},
    pipeline::RemovalPipeline,
    processor::BackendType,
    server,
    tracing_config::{TracingConfig, TracingFormat},
};
use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, info};

/// HTTP service that removes image backgrounds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-server")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on [default: $PORT, then 8080]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Model path, URL, or cached model id [default: u2net]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Inference backend (onnx, tract, mock)
    #[arg(short, long, default_value = "onnx")]
    pub backend: BackendType,

    /// ONNX Runtime execution provider (auto, cpu, cuda, coreml)
    #[arg(short, long, default_value = "auto")]
    pub execution_provider: ExecutionProvider,

    /// Number of inference threads (0 = runtime default)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Largest image side passed to the model
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION)]
    pub max_dimension: u32,

    /// Responses above this many bytes are gzip compressed
    #[arg(long, default_value_t = DEFAULT_GZIP_MIN_SIZE)]
    pub gzip_min_size: u16,

    /// Request body limit in MiB
    #[arg(long, default_value_t = 64)]
    pub max_body_mb: usize,

    /// Load the model on the first request instead of at startup
    #[arg(long)]
    pub lazy_init: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[cfg(feature = "tracing-json")]
    #[arg(long)]
    pub json_logs: bool,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Download the model (default: u2net) into the cache and exit
    #[arg(long)]
    pub only_download: bool,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    if cli.list_models {
        return list_cached_models();
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;

    if cli.only_download {
        return download_model_only(&cli).await;
    }

    let env_port = std::env::var("PORT").ok();
    let server_config = CliConfigBuilder::server_config(&cli, env_port.as_deref())?;

    let model_spec = if CliConfigBuilder::needs_model(&cli) {
        resolve_model(cli.model.as_deref())
            .await
            .context("Failed to prepare model")?
    } else {
        ModelSpec::default()
    };
    let processor_config = CliConfigBuilder::processor_config(&cli, model_spec)?;

    info!(
        backend = %processor_config.backend_type,
        provider = %processor_config.execution_provider,
        model = %processor_config.model_spec.source.display_name(),
        max_dimension = server_config.max_dimension,
        "Starting background removal server"
    );

    let pipeline = RemovalPipeline::from_config(&server_config, processor_config)
        .context("Failed to create background removal pipeline")?;

    server::serve(server_config, pipeline)
        .await
        .context("Server terminated with an error")?;

    Ok(())
}

/// Turn `--model` into a spec whose files are present on disk
async fn resolve_model(model: Option<&str>) -> Result<ModelSpec> {
    if let Some(url) = model.filter(|m| is_url(m)) {
        let downloader = ModelDownloader::new().context("Failed to create model downloader")?;
        let model_id = downloader
            .download_model(url, None)
            .await
            .with_context(|| format!("Failed to download model from {}", url))?;
        return Ok(ModelSpec::downloaded(model_id));
    }

    let spec = CliConfigBuilder::model_spec_from_arg(model);
    ensure_model_available(&spec).await?;
    Ok(spec)
}

/// Ensure a cached model exists, downloading the default model if needed
async fn ensure_model_available(model_spec: &ModelSpec) -> Result<()> {
    let ModelSource::Downloaded(model_id) = &model_spec.source else {
        return Ok(());
    };

    let cache = ModelCache::new().context("Failed to create model cache")?;
    if cache.is_model_cached(model_id) {
        debug!("Model {} found in cache", model_id);
        return Ok(());
    }

    if *model_id != ModelCache::get_default_model_id() {
        anyhow::bail!(
            "Model '{}' not found in cache. Use --only-download --model <URL> to download it, or --list-models to see available models.",
            model_id
        );
    }

    info!("Model not cached, downloading default model from {}", DEFAULT_MODEL_URL);
    let downloader =
        ModelDownloader::with_cache(cache).context("Failed to create model downloader")?;
    let downloaded_id = downloader
        .download_model(DEFAULT_MODEL_URL, None)
        .await
        .context("Failed to download default model")?;

    if downloaded_id != *model_id {
        anyhow::bail!(
            "Downloaded model ID '{}' doesn't match expected '{}'",
            downloaded_id,
            model_id
        );
    }
    Ok(())
}

fn tracing_format(cli: &Cli) -> TracingFormat {
    #[cfg(feature = "tracing-json")]
    {
        if cli.json_logs {
            return TracingFormat::Json;
        }
    }
    #[cfg(not(feature = "tracing-json"))]
    let _ = cli;
    TracingFormat::Console
}

fn init_tracing(cli: &Cli) -> Result<()> {
    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(tracing_format(cli))
        .init()
        .context("Failed to initialize tracing subscriber")?;

    debug!(verbosity = cli.verbose, "Tracing initialized");
    Ok(())
}

/// Print the backends and execution providers compiled into this build
fn show_provider_diagnostics() {
    println!("Backend and Execution Provider Diagnostics");
    println!("------------------------------------------");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected");

    println!("\nAvailable backends:");
    #[cfg(feature = "onnx")]
    println!("  • onnx: ONNX Runtime (default), hardware acceleration support");
    #[cfg(feature = "tract")]
    println!("  • tract: pure Rust, CPU only");
    println!("  • mock: synthetic mask, no model file (smoke tests)");

    #[cfg(feature = "onnx")]
    {
        println!("\nONNX Runtime execution providers:");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  • {}: {} - {}", name, status, description);
        }
    }

    #[cfg(feature = "tract")]
    {
        println!("\nTract execution providers:");
        for (name, available, description) in crate::backends::TractBackend::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  • {}: {} - {}", name, status, description);
        }
    }

    println!("\nExamples:");
    println!("  bgremove-server --execution-provider cuda");
    println!("  bgremove-server --backend tract");
}

fn list_cached_models() -> Result<()> {
    let cache = ModelCache::new().context("Failed to initialize model cache")?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("Cached models in {}", cache.get_current_cache_dir().display());

    if models.is_empty() {
        println!("No cached models found.");
        println!("\nTo download the default model:");
        println!("  bgremove-server --only-download");
        return Ok(());
    }

    for model in models {
        println!("• {}", model.model_id);
        println!("  └─ Location: {}", model.path.display());
        println!("  └─ Size: {}", format_size(model.size_bytes));
        if model.has_sidecar {
            println!("  └─ Preprocessing: model.json");
        }
    }

    println!("\nTo serve a cached model:");
    println!("  bgremove-server --model MODEL_ID");
    Ok(())
}

async fn download_model_only(cli: &Cli) -> Result<()> {
    let model_url = cli.model.as_deref().unwrap_or(DEFAULT_MODEL_URL);
    validate_model_url(model_url).context("Invalid model URL")?;

    println!("Downloading model from: {}", model_url);

    let downloader = ModelDownloader::new().context("Failed to create model downloader")?;
    let model_id = downloader
        .download_model(model_url, None)
        .await
        .context("Failed to download model")?;

    println!("Model ID: {}", model_id);
    println!(
        "Cache location: {}",
        downloader.cache().get_model_path(&model_id).display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maintenance_flags_parse() {
        let cli = Cli::try_parse_from(["bgremove-server", "--list-models"]).unwrap();
        assert!(cli.list_models);
        assert!(!cli.show_providers);

        let cli = Cli::try_parse_from(["bgremove-server", "-vv", "--show-providers"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.show_providers);
    }

    #[test]
    fn test_console_format_by_default() {
        let cli = Cli::try_parse_from(["bgremove-server"]).unwrap();
        assert_eq!(tracing_format(&cli), TracingFormat::Console);
    }

    #[tokio::test]
    async fn test_external_model_needs_no_download() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let model_file = temp_dir.path().join("custom.onnx");
        std::fs::write(&model_file, b"onnx").unwrap();

        let spec = resolve_model(model_file.to_str()).await.unwrap();
        assert_eq!(spec.source, ModelSource::External(model_file));
    }
}
