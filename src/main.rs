use std::process::ExitCode;

use clap::Parser;

mod changelog;
mod cli;
mod commands;
mod config;
mod csv_store;
mod error;
mod hash;
mod integrity;
mod keys;
mod media;
mod minisign;
mod repository;
mod scanner;
mod snapshot;
mod transaction;
mod verify;

use cli::{Cli, Commands};
use error::HistorifyError;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "warn".to_string()
            }
        });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    match cli.command {
        Commands::Init { path, name } => commands::init::execute(&path, name.as_deref()),
        Commands::Keygen {
            secret_key,
            public_key,
        } => commands::keygen::execute(&secret_key, &public_key),
        Commands::Config { key, value, path } => commands::config::execute(&key, &value, &path),
        Commands::CheckConfig { path } => commands::config::check(&path),
        Commands::AddCategory {
            name,
            datapath,
            path,
        } => commands::config::add_category(&name, &datapath, &path),
        Commands::Start { path } | Commands::Closing { path } => {
            commands::lifecycle::execute(&path)
        }
        Commands::Scan { path, category } => {
            commands::scan::execute(&path, category.as_deref())
        }
        Commands::Comment { message, path } => commands::comment::execute(&message, &path),
        Commands::Log {
            path,
            file,
            category,
            transaction_type,
        } => commands::log::execute(
            &path,
            file.as_deref(),
            category.as_deref(),
            transaction_type.as_deref(),
        ),
        Commands::Verify { path, full_chain } => commands::verify::execute(&path, full_chain),
        Commands::Status {
            path,
            category,
            format,
        } => commands::status::execute(
            &path,
            category.as_deref(),
            commands::status::OutputFormat::from_str(&format),
        ),
        Commands::Snapshot {
            out,
            path,
            full,
            media,
        } => commands::snapshot::execute(&out, &path, full, media.as_deref()),
    }
}

/// Map an error chain to the exit-code policy: 3 for integrity breaks,
/// 1 for everything else.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(historify) = cause.downcast_ref::<HistorifyError>() {
            return historify.exit_code();
        }
        if cause.downcast_ref::<error::ChainError>().is_some() {
            return 3;
        }
    }
    1
}
