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

//! Reservation service entry point
//!
//! Wires up the engine around an in-memory store:
//! - Change feed and store
//! - Change notifier
//! - Expiration sweeper (background thread)
//! - Audit listener logging every committed change

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;

use saveplate_reservation::{
	ChangeFeed, ChangeNotifier, ExpirationSweeper, MemoryStore, ReservationConfig, RowFilter,
	Stores, SubscriptionFilter,
};

#[tokio::main]
async fn main() -> Result<()> {
	saveplate_reservation::logging::init_logging()?;

	let config = ReservationConfig::from_env().unwrap_or_else(|_| {
		info!(target: "server", "Using default configuration");
		ReservationConfig::default()
	});

	info!(target: "server", "Starting SavePlate reservation engine");
	info!(target: "server", "Sweep interval: {}s", config.sweep_interval_secs);
	info!(target: "server", "Notification page size: {}", config.notification_page_size);
	info!(target: "server", "Feed subscriber capacity: {}", config.feed_subscriber_capacity);

	let feed = Arc::new(ChangeFeed::new(config.feed_subscriber_capacity));
	let store = Arc::new(MemoryStore::new(feed.clone()));
	let stores = Stores::from_memory(store);
	let notifier = Arc::new(ChangeNotifier::new(
		stores.notifications.clone(),
		config.notification_page_size,
	));

	info!(target: "server", "Starting audit listener...");
	let audit = feed.on(SubscriptionFilter::new(RowFilter::Any), |event| {
		info!(
			target: "server",
			seq = event.seq,
			table = ?event.table(),
			kind = ?event.kind,
			row_id = event.row.id(),
			status = event.row.status().unwrap_or("-"),
			previous_status = event.previous_status.as_deref().unwrap_or("-"),
			"Change committed"
		);
	});

	info!(target: "server", "Starting expiration sweeper...");
	let sweeper = Arc::new(ExpirationSweeper::new(stores, notifier))
		.start(
			Duration::from_secs(config.sweep_interval_secs.max(1)),
			config.sweep_on_start,
		)
		.context("Failed to spawn expiration sweeper thread")?;

	signal::ctrl_c()
		.await
		.context("Failed to listen for shutdown signal")?;

	info!(target: "server", "Shutting down components...");
	sweeper.shutdown();
	audit.stop();

	info!(target: "server", "Shutdown complete");
	Ok(())
}
