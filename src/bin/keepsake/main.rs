// Keepsake backup scheduler.
// Copyright 2024-2026 Keepsake contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Command-line entry point for Keepsake.

use std::error::Error as StdError;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thousands::Separable;
use time::format_description::well_known::Rfc3339;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn, Level};

use keepsake::disk::format_gb;
use keepsake::*;

mod log;

use crate::log::TraceTimeStyle;

#[derive(Debug, Parser)]
#[command(author, about, version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path of the json configuration file.
    #[arg(long, short, global = true, default_value = "keepsake.json")]
    config: PathBuf,

    /// Show debug trace on stderr.
    #[arg(long, short = 'D', global = true)]
    debug: bool,

    /// Control timestamps prefixes on stderr.
    #[arg(long, value_enum, global = true, default_value_t = TraceTimeStyle::None)]
    trace_time: TraceTimeStyle,

    /// Append a json formatted log to this file.
    #[arg(long, global = true)]
    log_json: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run scheduled backups until interrupted.
    Run {
        /// Seconds between checks of the schedule.
        #[arg(long, default_value_t = 1)]
        poll_secs: u64,
    },

    /// Take a backup now.
    Backup {
        /// Don't upload the new archive, even if uploading is enabled.
        #[arg(long)]
        local: bool,
    },

    /// Upload a small file and delete it again, to check the upload settings.
    TestUpload,

    /// List archives in the backup directory, oldest first.
    List {
        /// Show size and modification time.
        #[arg(long, short)]
        long: bool,
    },

    /// Show space on the disk holding the backups.
    Stats,

    /// Check the configuration and show when the next backup is due.
    Check,
}

enum ExitCode {
    Success = 0,
    Failure = 1,
    NonFatalErrors = 2,
}

impl std::process::Termination for ExitCode {
    fn report(self) -> std::process::ExitCode {
        (self as u8).into()
    }
}

impl Command {
    async fn run(&self, config_path: &Path) -> Result<ExitCode> {
        let mut stdout = io::stdout();
        let config = Config::load(config_path)?;
        match self {
            Command::Run { poll_secs } => {
                let (keepsake, host) = start(config)?;
                if keepsake.config().only_backup_if_activity {
                    warn!("only_backup_if_activity is set, but a directory host never reports activity; scheduled backups will be skipped");
                }
                let shutdown = async move {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for interrupts: {err}");
                    }
                    info!("Shutting down...");
                    host.shutdown();
                };
                keepsake
                    .run_scheduler(Duration::from_secs((*poll_secs).max(1)), shutdown)
                    .await;
            }
            Command::Backup { local } => {
                let (keepsake, _host) = start(config)?;
                match keepsake.run_backup(!local).await? {
                    BackupOutcome::Completed {
                        path,
                        stats,
                        upload,
                    } => {
                        writeln!(stdout, "{}", path.display())?;
                        if stats.errors > 0
                            || matches!(upload, Some(UploadOutcome::Skipped(_)))
                            || (!local && keepsake.config().upload.enable && upload.is_none())
                        {
                            return Ok(ExitCode::NonFatalErrors);
                        }
                    }
                    BackupOutcome::Skipped(reason) => {
                        warn!("Backup skipped: {reason:?}");
                        return Ok(ExitCode::Failure);
                    }
                }
            }
            Command::TestUpload => {
                let (keepsake, _host) = start(config)?;
                match keepsake.run_test_upload().await? {
                    UploadOutcome::TestPassed => writeln!(stdout, "Upload test passed")?,
                    other => {
                        warn!("Upload test did not run: {other:?}");
                        return Ok(ExitCode::Failure);
                    }
                }
            }
            Command::List { long } => {
                for archive in list_archives(&config.backup_dir())? {
                    if *long {
                        let modified = archive.modified.format(&Rfc3339).unwrap_or_default();
                        writeln!(
                            stdout,
                            "{:<40} {:>14} {modified}",
                            archive.name,
                            archive.len.separate_with_commas(),
                        )?;
                    } else {
                        writeln!(stdout, "{}", archive.name)?;
                    }
                }
            }
            Command::Stats => {
                let stats = DiskStats::for_path(&config.backup_dir())?;
                writeln!(stdout, "Total space: {} GB", format_gb(stats.total))?;
                writeln!(stdout, "Free space: {} GB", format_gb(stats.free))?;
                writeln!(stdout, "Usable space: {} GB", format_gb(stats.usable))?;
            }
            Command::Check => {
                let state = check_schedule(&config.schedule, local_now())?;
                config.archive_name(local_now())?;
                writeln!(stdout, "Next backup at {}", state.next_execution())?;
            }
        }
        Ok(ExitCode::Success)
    }
}

/// Build the engine around a host whose units are the configured directories.
fn start(config: Config) -> Result<(Keepsake, Arc<DirectoryHost>)> {
    let host =
        Arc::new(DirectoryHost::from_config(&config).map_err(|source| Error::StartHost { source })?);
    let keepsake = Keepsake::new(config, host.clone())?;
    Ok((keepsake, host))
}

fn main() -> ExitCode {
    let args = Args::parse();
    let trace_level = if args.debug {
        Level::TRACE
    } else {
        Level::INFO
    };
    let _flush_guard =
        match log::enable_tracing(&args.trace_time, trace_level, args.log_json.as_deref()) {
            Ok(guard) => guard,
            Err(err) => {
                eprintln!("Failed to open json log: {err}");
                return ExitCode::Failure;
            }
        };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start runtime: {err}");
            return ExitCode::Failure;
        }
    };
    match runtime.block_on(args.command.run(&args.config)) {
        Err(err) => {
            error!("{err}");
            let mut err: &dyn StdError = &err;
            while let Some(source) = err.source() {
                error!("caused by: {source}");
                err = source;
            }
            ExitCode::Failure
        }
        Ok(exit_code) => exit_code,
    }
}

#[test]
fn verify_clap() {
    use clap::CommandFactory;
    Args::command().debug_assert()
}
