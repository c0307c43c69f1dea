pub mod app;
mod cli;
pub mod commands;
pub mod db;
pub mod error;
pub mod export;
pub mod persistence;
pub mod scanner;
pub mod settings;
pub mod utils;

use std::{path::Path, process::ExitCode};

use clap::Parser;
use log::{error, info};

use app::ScanApp;
use cli::{Cli, Command};
use error::ScanError;
use export::ExportOutcome;
use settings::SettingsStore;

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_INVALID_RANGE: u8 = 2;
const EXIT_NO_DATA: u8 = 3;
const EXIT_NOT_FOUND: u8 = 4;
const EXIT_SHUTDOWN_TIMEOUT: u8 = 70;

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    let settings_store = match SettingsStore::new(cli.config.clone()) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("failed to load settings: {err:#}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    let mut settings = settings_store.get();
    let debug_mode = settings.apply_env_overrides();

    // RUST_LOG still wins over the defaults chosen here.
    env_logger::Builder::new()
        .filter_level(if debug_mode {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();
    utils::logging::set_verbose(debug_mode);

    if let Some(db) = &cli.db {
        settings.database_path = Some(db.clone());
    }
    let base_dir = settings_store
        .path()
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let db_path = settings.resolve_database_path(base_dir);

    info!("scanlog starting (database {})", db_path.display());

    let mut app = match ScanApp::open(settings, db_path) {
        Ok(app) => app,
        Err(err) => {
            error!("failed to open scan history: {err:#}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let outcome = execute(&mut app, cli.command).await;
    let shutdown = app.shutdown().await;

    let code = match (outcome, shutdown) {
        (_, Err(err)) if err.is_fatal() => {
            error!("{err}; forcing exit");
            EXIT_SHUTDOWN_TIMEOUT
        }
        (Err(err), _) => report_error(&err),
        (Ok(EXIT_SUCCESS), Err(err)) => {
            error!("shutdown failed: {err}");
            EXIT_FAILURE
        }
        (Ok(code), _) => code,
    };
    ExitCode::from(code)
}

async fn execute(app: &mut ScanApp, command: Command) -> Result<u8, ScanError> {
    match command {
        Command::Replay { log } => {
            let summary = commands::replay(app, &log).await?;
            for scan in &summary.committed {
                println!("{}\t{}\t{}", scan.id, scan.detected_at, scan.content);
            }
            println!(
                "frames: {}, unavailable: {}, detections: {}, accepted: {}, committed: {}, failed: {}",
                summary.scan.frames,
                summary.scan.unavailable,
                summary.scan.detections,
                summary.scan.accepted,
                summary.worker.committed,
                summary.worker.failed
            );
        }
        Command::History { limit } => {
            for scan in commands::history(app, limit).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    scan.id,
                    scan.detected_at,
                    scan.content,
                    scan.note.unwrap_or_default()
                );
            }
        }
        Command::Export { from, to } => match commands::export(app, from, to).await? {
            ExportOutcome::Rows(rows) => {
                println!("# {}", export::default_file_stem(from, to));
                for row in rows {
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        row.sequence_number,
                        row.content,
                        row.date,
                        row.time,
                        row.note.unwrap_or_default()
                    );
                }
            }
            ExportOutcome::NoData => {
                eprintln!("no scans between {from} and {to}");
                return Ok(EXIT_NO_DATA);
            }
        },
        Command::Note { id, text } => {
            commands::set_note(app, id, &text.join(" ")).await?;
            println!("note updated for scan {id}");
        }
    }

    Ok(EXIT_SUCCESS)
}

fn report_error(err: &ScanError) -> u8 {
    eprintln!("{err:#}");
    match err {
        ScanError::InvalidDateRange { .. } => EXIT_INVALID_RANGE,
        ScanError::NotFound(_) => EXIT_NOT_FOUND,
        ScanError::ShutdownTimeout(_) => EXIT_SHUTDOWN_TIMEOUT,
        _ => EXIT_FAILURE,
    }
}
