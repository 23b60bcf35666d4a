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

//! Reservation service configuration
//!
//! Settings load from environment variables prefixed with `SAVEPLATE_`, or
//! from a file with the same variables layered on top. Every field has a
//! default, so an empty environment yields a working service.
//!
//! | Variable                              | Default | Meaning                                  |
//! |---------------------------------------|---------|------------------------------------------|
//! | `SAVEPLATE_SWEEP_INTERVAL_SECS`       | `300`   | Seconds between expiration sweeps        |
//! | `SAVEPLATE_SWEEP_ON_START`            | `true`  | Sweep once as soon as the sweeper starts |
//! | `SAVEPLATE_NOTIFICATION_PAGE_SIZE`    | `50`    | Notifications returned per fetch         |
//! | `SAVEPLATE_FEED_SUBSCRIBER_CAPACITY`  | `1024`  | Queued change events per subscriber      |
//!
//! Logging reads its own variables, see [`crate::logging`].

use serde::{Deserialize, Serialize};

// Logging configuration constants
/// Default log level (can be overridden by RUST_LOG environment variable)
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log directory component name
pub const LOG_COMPONENT_NAME: &str = "reservation";

/// Default console output enabled (can be overridden by LOG_TO_CONSOLE environment variable)
pub const DEFAULT_LOG_TO_CONSOLE: bool = false;

/// Default interval between expiration sweeps (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Default number of notifications returned per fetch
pub const DEFAULT_NOTIFICATION_PAGE_SIZE: usize = 50;

/// Default per-subscriber change feed queue capacity
pub const DEFAULT_FEED_SUBSCRIBER_CAPACITY: usize = 1_024;

/// Reservation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
	/// Interval between expiration sweeps (seconds)
	pub sweep_interval_secs: u64,
	/// Run one sweep immediately when the sweeper starts
	pub sweep_on_start: bool,
	/// Maximum notifications returned by a single fetch
	pub notification_page_size: usize,
	/// Bounded queue size of each change feed subscriber
	pub feed_subscriber_capacity: usize,
}

impl Default for ReservationConfig {
	fn default() -> Self {
		Self {
			sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
			sweep_on_start: true,
			notification_page_size: DEFAULT_NOTIFICATION_PAGE_SIZE,
			feed_subscriber_capacity: DEFAULT_FEED_SUBSCRIBER_CAPACITY,
		}
	}
}

impl ReservationConfig {
	/// Load configuration from environment variables
	///
	/// Variables use the `SAVEPLATE_` prefix, e.g. `SAVEPLATE_SWEEP_INTERVAL_SECS=60`.
	pub fn from_env() -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::Environment::with_prefix("SAVEPLATE"))
			.build()?;

		cfg.try_deserialize()
	}

	/// Load configuration from file
	pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::File::with_name(path))
			.add_source(config::Environment::with_prefix("SAVEPLATE"))
			.build()?;

		cfg.try_deserialize()
	}
}
