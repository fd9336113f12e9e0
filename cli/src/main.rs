use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use wiretap_core::config::LoggingConfig;

mod commands;
mod config;
mod error;
mod progress;

use commands::cli;
use commands::Runtime;
use error::CliError;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let cfg = config::load(args.config.as_deref())?;
    init_tracing(&cfg.logging).map_err(CliError::Config)?;
    dispatch(args.command, cfg, args.json).await
}

async fn dispatch(
    cmd: cli::Commands,
    cfg: wiretap_core::AppConfig,
    json: bool,
) -> Result<i32, CliError> {
    match cmd {
        cli::Commands::Capture(capture_args) => {
            commands::capture::run(capture_args, cfg, json).await
        }
        cli::Commands::Run(run_args) => {
            let rt = Runtime::open(cfg).await?;
            let result = commands::run::run(run_args, &rt, json).await;
            rt.close(result).await
        }
        cli::Commands::Schedule { command } => {
            let rt = Runtime::open(cfg).await?;
            let result = commands::schedule::run(command, &rt, json).await;
            rt.close(result).await
        }
        cli::Commands::Collections { command } => {
            let rt = Runtime::open(cfg).await?;
            let result = commands::collections::run(command, &rt, json).await;
            rt.close(result).await
        }
        cli::Commands::Op(op_args) => {
            let rt = Runtime::open(cfg).await?;
            let result = commands::op::run(op_args, &rt).await;
            rt.close(result).await
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("wiretap"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("wiretap.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    // Records can go to stdout, so the console layer always writes stderr.
    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .with_target(true)
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
