// Copyright 2025 itscheems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Logging initialization for the reservation service
//!
//! Logs go to a daily rolling file and, optionally, to the console.
//!
//! # Configuration
//!
//! The following environment variables can be used to configure logging:
//!
//! - `RUST_LOG`: Log level filter (default: `info`)
//!   - Examples: `debug`, `info`, `warn`, `error`
//!   - Can be set per module: `RUST_LOG=saveplate_reservation=debug`
//!
//! - `LOG_DIR`: Root directory for log files (default: `{project_root}/logs`)
//!   - If not set, the project root is detected from the workspace `Cargo.toml`
//!   - Log files are created in `{LOG_DIR}/reservation/`
//!   - Example: `LOG_DIR=/var/log/saveplate`
//!
//! - `LOG_TO_CONSOLE`: Mirror logs to stderr (default: `false`)
//!   - Set to `true`, `1` or `yes` to enable it
//!   - Console output keeps ANSI colors
//!   - Example: `LOG_TO_CONSOLE=true`
//!
//! # Log File Format
//!
//! - Directory: `{LOG_DIR}/reservation/`
//! - Rotation: one file per day (UTC) through `tracing_appender::rolling`
//! - Filename: `{component}.{date}.log`, e.g. `reservation.2026-01-03.log`
//! - Format: UTC timestamp, thread ID, log level, target, message and fields
//! - ANSI colors: disabled in the file
//!
//! Every component logs under a stable target (`orchestrator`, `sweeper`,
//! `notifier`, `feed`, `store`, `server`) so filters such as
//! `RUST_LOG=sweeper=debug` isolate one of them.

use std::{
	env,
	path::{Path, PathBuf},
	sync::OnceLock,
};

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::{
	non_blocking,
	rolling::{self, Rotation},
};
use tracing_subscriber::{
	EnvFilter, fmt, layer::SubscriberExt, registry::Registry, util::SubscriberInitExt,
};

use crate::config::{DEFAULT_LOG_LEVEL, DEFAULT_LOG_TO_CONSOLE, LOG_COMPONENT_NAME};

// Keeps the non-blocking writer flushing until process exit
static LOG_GUARD: OnceLock<non_blocking::WorkerGuard> = OnceLock::new();

/// Walk up from the crate (or current) directory to the workspace root
fn find_project_root() -> PathBuf {
	let start = env::var("CARGO_MANIFEST_DIR")
		.map(PathBuf::from)
		.or_else(|_| env::current_dir())
		.unwrap_or_else(|_| PathBuf::from("."));

	let mut current = start.clone();
	loop {
		let cargo_toml = current.join("Cargo.toml");
		if let Ok(content) = std::fs::read_to_string(&cargo_toml)
			&& content.contains("[workspace]")
		{
			return current;
		}
		match current.parent() {
			Some(parent) => current = parent.to_path_buf(),
			None => return start,
		}
	}
}

fn get_log_root() -> PathBuf {
	env::var("LOG_DIR")
		.map(PathBuf::from)
		.unwrap_or_else(|_| find_project_root().join("logs"))
}

/// Daily-rolling file writer, `{component}.{date}.log`
fn setup_file_logging(log_dir: &Path) -> Result<non_blocking::NonBlocking> {
	let file_appender = rolling::RollingFileAppender::builder()
		.rotation(Rotation::DAILY)
		.filename_prefix(LOG_COMPONENT_NAME.to_string())
		.filename_suffix("log")
		.build(log_dir)
		.with_context(|| {
			format!(
				"Failed to create rolling file appender in {}",
				log_dir.display()
			)
		})?;

	let (file_writer, guard) = non_blocking(file_appender);
	LOG_GUARD.set(guard).ok();

	Ok(file_writer)
}

/// Initialize logging with file output and optional console output
///
/// Returns an error if the log directory or file cannot be created, or if a
/// global subscriber is already installed.
pub fn init_logging() -> Result<()> {
	dotenv::dotenv().ok();

	let log_level = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

	let log_dir = get_log_root().join(LOG_COMPONENT_NAME);
	std::fs::create_dir_all(&log_dir)
		.with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

	let file_writer = setup_file_logging(&log_dir)?;

	let log_to_console = env::var("LOG_TO_CONSOLE")
		.map(|v| v == "true" || v == "1" || v == "yes")
		.unwrap_or(DEFAULT_LOG_TO_CONSOLE);

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

	let file_layer = fmt::layer()
		.with_writer(file_writer)
		.with_timer(fmt::time::UtcTime::rfc_3339())
		.with_thread_ids(true)
		.with_target(true)
		.with_thread_names(false)
		.with_ansi(false);

	let console_layer = log_to_console.then(|| {
		fmt::layer()
			.with_writer(std::io::stderr)
			.with_timer(fmt::time::UtcTime::rfc_3339())
			.with_thread_ids(true)
			.with_target(true)
			.with_thread_names(false)
			.with_ansi(true)
	});

	Registry::default()
		.with(filter)
		.with(file_layer)
		.with(console_layer)
		.try_init()
		.context("Failed to install global tracing subscriber")?;

	info!(target: "server", "Log level: {}", log_level);
	info!(target: "server", "Log directory: {}", log_dir.display());
	info!(
		target: "server",
		"Log file base name: {}.YYYY-MM-DD.log (daily rolling)",
		LOG_COMPONENT_NAME
	);
	if log_to_console {
		info!(target: "server", "Console output: enabled");
	}

	Ok(())
}
