//! Conversion of command line arguments into server and processor configuration

use crate::cli::main_impl::Cli;
use crate::{
    config::{port_from_env, InitMode, ServerConfig},
    download::is_url,
    models::ModelSpec,
    processor::{BackendType, ProcessorConfig, ProcessorConfigBuilder},
};
use anyhow::{Context, Result};
use std::path::Path;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Reject argument combinations clap cannot express
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.max_dimension == 0 {
            anyhow::bail!("--max-dimension must be at least 1");
        }
        if cli.max_body_mb == 0 {
            anyhow::bail!("--max-body-mb must be at least 1");
        }
        if cli.only_download && cli.model.as_deref().is_some_and(|m| !is_url(m)) {
            anyhow::bail!("--only-download requires --model to be a URL");
        }
        Ok(())
    }

    /// `--port`, then `PORT`, then 8080
    pub(crate) fn resolve_port(cli_port: Option<u16>, env_port: Option<&str>) -> Result<u16> {
        match cli_port {
            Some(port) => Ok(port),
            None => port_from_env(env_port).context("Invalid PORT environment variable"),
        }
    }

    pub(crate) fn server_config(cli: &Cli, env_port: Option<&str>) -> Result<ServerConfig> {
        let port = Self::resolve_port(cli.port, env_port)?;
        let init_mode = if cli.lazy_init {
            InitMode::Lazy
        } else {
            InitMode::Eager
        };

        ServerConfig::builder()
            .host(cli.host)
            .port(port)
            .max_dimension(cli.max_dimension)
            .gzip_min_size(cli.gzip_min_size)
            .max_body_bytes(cli.max_body_mb.saturating_mul(1024 * 1024))
            .init_mode(init_mode)
            .build()
            .context("Invalid server configuration")
    }

    /// Model spec for a `--model` value that is not a URL.
    ///
    /// An existing path is an external model, anything else a cache id.
    pub(crate) fn model_spec_from_arg(model: Option<&str>) -> ModelSpec {
        match model {
            None => ModelSpec::default(),
            Some(arg) if Path::new(arg).exists() => ModelSpec::external(arg),
            Some(id) => ModelSpec::downloaded(id),
        }
    }

    pub(crate) fn processor_config(cli: &Cli, model_spec: ModelSpec) -> Result<ProcessorConfig> {
        ProcessorConfigBuilder::new()
            .model_spec(model_spec)
            .backend_type(cli.backend)
            .execution_provider(cli.execution_provider)
            // Same count for intra and inter op parallelism
            .intra_threads(cli.threads)
            .inter_threads(cli.threads)
            .build()
            .context("Invalid processor configuration")
    }

    /// The mock backend never touches a model file
    pub(crate) fn needs_model(cli: &Cli) -> bool {
        cli.backend != BackendType::Mock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionProvider;
    use crate::models::ModelSource;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["bgremove-server"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        let config = CliConfigBuilder::server_config(&cli, None).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_dimension, 1500);
        assert_eq!(config.gzip_min_size, 1000);
        assert_eq!(config.max_body_bytes, 64 * 1024 * 1024);
        assert_eq!(config.init_mode, InitMode::Eager);
        assert_eq!(config.host.to_string(), "0.0.0.0");

        let processor = CliConfigBuilder::processor_config(&cli, ModelSpec::default()).unwrap();
        assert_eq!(processor.backend_type, BackendType::Onnx);
        assert_eq!(processor.execution_provider, ExecutionProvider::Auto);
    }

    #[test]
    fn test_port_precedence() {
        assert_eq!(CliConfigBuilder::resolve_port(Some(9000), Some("7000")).unwrap(), 9000);
        assert_eq!(CliConfigBuilder::resolve_port(None, Some("7000")).unwrap(), 7000);
        assert_eq!(CliConfigBuilder::resolve_port(None, None).unwrap(), 8080);
        assert!(CliConfigBuilder::resolve_port(None, Some("eighty")).is_err());
        // An explicit flag wins even over a broken PORT
        assert_eq!(CliConfigBuilder::resolve_port(Some(1), Some("eighty")).unwrap(), 1);
    }

    #[test]
    fn test_server_flags() {
        let cli = parse(&[
            "--host",
            "127.0.0.1",
            "--port",
            "3000",
            "--max-dimension",
            "800",
            "--gzip-min-size",
            "2048",
            "--max-body-mb",
            "8",
            "--lazy-init",
        ]);
        let config = CliConfigBuilder::server_config(&cli, Some("9999")).unwrap();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3000");
        assert_eq!(config.max_dimension, 800);
        assert_eq!(config.gzip_min_size, 2048);
        assert_eq!(config.max_body_bytes, 8 * 1024 * 1024);
        assert_eq!(config.init_mode, InitMode::Lazy);
    }

    #[test]
    fn test_backend_and_provider_flags() {
        let cli = parse(&["--backend", "mock", "--execution-provider", "cpu", "--threads", "4"]);
        assert!(!CliConfigBuilder::needs_model(&cli));

        let processor = CliConfigBuilder::processor_config(&cli, ModelSpec::default()).unwrap();
        assert_eq!(processor.backend_type, BackendType::Mock);
        assert_eq!(processor.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(processor.intra_threads, 4);
        assert_eq!(processor.inter_threads, 4);

        assert!(Cli::try_parse_from(["bgremove-server", "--backend", "pytorch"]).is_err());
    }

    #[test]
    fn test_model_spec_from_arg() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let model_file = temp_dir.path().join("u2net.onnx");
        std::fs::write(&model_file, b"onnx").unwrap();

        let spec = CliConfigBuilder::model_spec_from_arg(model_file.to_str());
        assert_eq!(spec.source, ModelSource::External(model_file.clone()));

        let spec = CliConfigBuilder::model_spec_from_arg(Some("u2net-0123abcd"));
        assert_eq!(spec.source, ModelSource::Downloaded("u2net-0123abcd".to_string()));

        assert_eq!(CliConfigBuilder::model_spec_from_arg(None), ModelSpec::default());
    }

    #[test]
    fn test_validation() {
        assert!(CliConfigBuilder::validate_cli(&parse(&[])).is_ok());
        assert!(CliConfigBuilder::validate_cli(&parse(&["--max-dimension", "0"])).is_err());
        assert!(CliConfigBuilder::validate_cli(&parse(&["--max-body-mb", "0"])).is_err());
        assert!(
            CliConfigBuilder::validate_cli(&parse(&["--only-download", "--model", "local-id"]))
                .is_err()
        );
    }
}
