//! `xray-translate` CLI - serve or run chest X-ray translation.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xray_translate::model::GeneratorConfig;
use xray_translate::server::{self, ServerConfig, DEFAULT_MAX_UPLOAD_BYTES};
use xray_translate::{Config, Direction, Translator};

/// Translate chest X-rays between normal and pneumonia with CycleGAN generators.
#[derive(Parser, Debug)]
#[command(name = "xray-translate")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Translate a single image file.
    Translate(TranslateArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Directory holding the generator checkpoints.
    #[arg(long, env = "XRAY_MODEL_DIR", default_value = "checkpoints", value_name = "DIR")]
    model_dir: PathBuf,

    /// Checkpoint file for normal -> pneumonia.
    #[arg(
        long,
        default_value_t = Direction::NormalToPneumonia.default_checkpoint().to_string(),
        value_name = "FILE"
    )]
    normal_to_pneumonia: String,

    /// Checkpoint file for pneumonia -> normal.
    #[arg(
        long,
        default_value_t = Direction::PneumoniaToNormal.default_checkpoint().to_string(),
        value_name = "FILE"
    )]
    pneumonia_to_normal: String,

    /// Number of residual blocks the checkpoints were trained with.
    #[arg(long, default_value = "9", value_name = "INT")]
    res_blocks: usize,

    /// Run on the CPU even if a GPU is available.
    #[arg(long)]
    cpu: bool,
}

impl ModelArgs {
    fn config(&self) -> Config {
        Config {
            model_dir: self.model_dir.clone(),
            normal_to_pneumonia_checkpoint: self.normal_to_pneumonia.clone(),
            pneumonia_to_normal_checkpoint: self.pneumonia_to_normal.clone(),
            generator: GeneratorConfig {
                num_res_blocks: self.res_blocks,
                ..GeneratorConfig::default()
            },
            use_cpu: self.cpu,
        }
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Address to bind.
    #[arg(long, env = "XRAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "XRAY_PORT", default_value = "8000")]
    port: u16,

    /// Largest accepted request body in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, value_name = "BYTES")]
    max_upload_bytes: usize,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    /// Input image path.
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output image path.
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// normal_to_pneumonia or pneumonia_to_normal.
    #[arg(short, long, value_name = "DIRECTION")]
    direction: Direction,

    #[command(flatten)]
    model: ModelArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("xray_translate={log_level},tower_http={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let result = match &cli.command {
        Command::Serve(args) => run_server(args),
        Command::Translate(args) => run_translate(args),
    };

    if let Err(err) = result {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run_server(args: &ServeArgs) -> Result<()> {
    let translator =
        Translator::load(&args.model.config()).context("Failed to initialize translator")?;

    let config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
        max_upload_bytes: args.max_upload_bytes,
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime
        .block_on(server::serve(Arc::new(translator), &config))
        .context("Server failed")
}

fn run_translate(args: &TranslateArgs) -> Result<()> {
    // Validate input file exists
    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }

    let translator =
        Translator::load(&args.model.config()).context("Failed to initialize translator")?;

    let input = xray_translate::image::load_image(&args.input)?;
    let output = translator
        .translate(&input, args.direction)
        .context("Failed to translate image")?;
    xray_translate::image::save_image(&output, &args.output)?;

    println!(
        "Translated {} ({} -> {}) to {}",
        args.input.display(),
        args.direction.source(),
        args.direction.target(),
        args.output.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_checkpoint_defaults_follow_direction() {
        let cli = Cli::try_parse_from(["xray-translate", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        let config = args.model.config();
        for direction in Direction::ALL {
            assert_eq!(config.checkpoint(direction), direction.default_checkpoint());
        }
        assert_eq!(config.generator, GeneratorConfig::default());
    }
}
