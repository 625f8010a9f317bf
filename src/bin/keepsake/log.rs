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

//! Send tracing output to the terminal, and optionally to a json log file.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use tracing::{trace, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::Registry;

/// Chosen style of timestamp prefix on trace lines.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum TraceTimeStyle {
    /// No timestamp on trace lines.
    None,
    /// Universal time, in RFC 3339 style.
    Utc,
    /// Local time, in RFC 3339, using the offset when the program starts.
    Local,
    /// Time since the start of the process, in seconds.
    Relative,
}

/// Install the global subscriber.
///
/// The returned guard flushes the json log when dropped, so keep it until
/// the program exits.
#[must_use = "the json log is only flushed when the guard is dropped"]
pub fn enable_tracing(
    time_style: &TraceTimeStyle,
    console_level: Level,
    json_path: Option<&Path>,
) -> io::Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt::time;

    fn hookup<FT>(
        timer: FT,
        console_level: Level,
        json_path: Option<&Path>,
    ) -> io::Result<Option<WorkerGuard>>
    where
        FT: FormatTime + Send + Sync + 'static,
    {
        let console_layer = tracing_subscriber::fmt::Layer::default()
            .with_ansi(clicolors_control::colors_enabled())
            .with_writer(io::stderr)
            .with_timer(timer)
            .with_filter(filter::Targets::new().with_target("keepsake", console_level));
        let (json_layer, flush_guard) = match json_path {
            Some(json_path) => {
                let file_writer = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(json_path)?;
                let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
                let layer = tracing_subscriber::fmt::Layer::default()
                    .json()
                    .with_writer(non_blocking)
                    .with_filter(filter::Targets::new().with_target("keepsake", Level::DEBUG));
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };
        Registry::default()
            .with(console_layer)
            .with(json_layer)
            .init();
        Ok(flush_guard)
    }

    let flush_guard = match time_style {
        TraceTimeStyle::None => hookup((), console_level, json_path)?,
        TraceTimeStyle::Utc => hookup(time::UtcTime::rfc_3339(), console_level, json_path)?,
        TraceTimeStyle::Relative => hookup(time::uptime(), console_level, json_path)?,
        TraceTimeStyle::Local => match time::OffsetTime::local_rfc_3339() {
            Ok(timer) => hookup(timer, console_level, json_path)?,
            // The local offset can't always be found, for example in a
            // multithreaded process on some platforms.
            Err(_) => hookup(time::UtcTime::rfc_3339(), console_level, json_path)?,
        },
    };
    trace!("Tracing enabled");
    Ok(flush_guard)
}
