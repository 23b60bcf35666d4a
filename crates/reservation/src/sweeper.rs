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

//! Expiration sweeper
//!
//! Periodically expires `available` listings whose `expiration` has passed,
//! together with the pending requests on them. Listings that are already
//! `reserved` are left alone: a confirmed reservation survives the listing's
//! expiration, and confirmed reservations never expire by time.
//!
//! Every write is a conditional update, so a sweep racing a confirmation
//! cannot overwrite the confirmation. A reconcile pass closes pending
//! requests left behind on listings that can no longer be requested (a
//! previous sweep that stopped half way, or a request that slipped in while
//! a confirmation was committing). Running a sweep twice with no other
//! writes in between changes nothing the second time.

use std::{
	collections::BTreeSet,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	thread::{self, JoinHandle},
	time::Duration,
};

use chrono::Utc;
use crossbeam::channel::{RecvTimeoutError, Sender, bounded};
use saveplate_sdk::{Listing, ListingStatus, ReservationStatus, Timestamp};
use tracing::{debug, error, info, warn};

use crate::{error::ReservationError, notifier::ChangeNotifier, store::Stores};

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
	pub listings_expired: usize,
	/// Listings another writer moved before the sweep could expire them
	pub listings_skipped: usize,
	pub reservations_expired: usize,
	/// Per-listing writes that failed; they are retried on the next sweep
	pub failures: usize,
}

impl SweepReport {
	pub fn is_noop(&self) -> bool {
		self.listings_expired == 0 && self.reservations_expired == 0
	}
}

pub struct ExpirationSweeper {
	stores: Stores,
	notifier: Arc<ChangeNotifier>,
}

impl ExpirationSweeper {
	pub fn new(stores: Stores, notifier: Arc<ChangeNotifier>) -> Self {
		Self { stores, notifier }
	}

	pub fn sweep(&self) -> Result<SweepReport, ReservationError> {
		self.sweep_at(Utc::now())
	}

	/// Run one sweep as of `now`
	///
	/// Fails only when the candidate queries themselves fail; individual
	/// listing failures are counted in the report and left for the next run.
	pub fn sweep_at(&self, now: Timestamp) -> Result<SweepReport, ReservationError> {
		let mut report = SweepReport::default();

		for listing in self.stores.listings.available_expired_before(now)? {
			match self.stores.listings.transition_listing(
				&listing.id,
				ListingStatus::Available,
				ListingStatus::Expired,
				now,
			) {
				Ok(Some(expired)) => {
					report.listings_expired += 1;
					debug!(
						target: "sweeper",
						listing_id = %expired.id,
						expiration = %expired.expiration,
						"Listing expired"
					);
					self.notifier.listing_expired_for_donor(&expired);
					if let Err(e) = self.expire_requests(&expired, None, now, &mut report) {
						report.failures += 1;
						error!(
							target: "sweeper",
							listing_id = %expired.id,
							error = %e,
							"Failed to expire pending requests"
						);
					}
				}
				Ok(None) => {
					report.listings_skipped += 1;
					debug!(
						target: "sweeper",
						listing_id = %listing.id,
						"Listing changed before it could be expired"
					);
				}
				Err(e) => {
					report.failures += 1;
					error!(
						target: "sweeper",
						listing_id = %listing.id,
						error = %e,
						"Failed to expire listing"
					);
				}
			}
		}

		self.reconcile(now, &mut report)?;

		if report.is_noop() {
			debug!(target: "sweeper", "Sweep found nothing to expire");
		} else {
			info!(
				target: "sweeper",
				listings_expired = report.listings_expired,
				listings_skipped = report.listings_skipped,
				reservations_expired = report.reservations_expired,
				failures = report.failures,
				"Sweep completed"
			);
		}

		Ok(report)
	}

	/// Close pending requests on listings that are no longer `available`
	fn reconcile(&self, now: Timestamp, report: &mut SweepReport) -> Result<(), ReservationError> {
		let listing_ids: BTreeSet<_> = self
			.stores
			.reservations
			.reservations_with_status(ReservationStatus::Pending)?
			.into_iter()
			.map(|r| r.food_listing_id)
			.collect();

		for listing_id in listing_ids {
			if let Err(e) = self.reconcile_listing(&listing_id, now, report) {
				report.failures += 1;
				error!(
					target: "sweeper",
					listing_id = %listing_id,
					error = %e,
					"Failed to reconcile pending requests"
				);
			}
		}

		Ok(())
	}

	fn reconcile_listing(
		&self,
		listing_id: &str,
		now: Timestamp,
		report: &mut SweepReport,
	) -> Result<(), ReservationError> {
		let Some(listing) = self.stores.listings.listing(listing_id)? else {
			warn!(target: "sweeper", listing_id = %listing_id, "Pending request on missing listing");
			return Ok(());
		};

		match listing.status {
			ListingStatus::Available => Ok(()),
			ListingStatus::Expired => self.expire_requests(&listing, None, now, report),
			ListingStatus::Reserved | ListingStatus::Completed => {
				// Wait until the confirmation that claimed the listing has landed
				let holder = self
					.stores
					.reservations
					.reservations_for_listing(&listing.id)?
					.into_iter()
					.find(|r| {
						matches!(
							r.status,
							ReservationStatus::Confirmed | ReservationStatus::Completed
						)
					});
				match holder {
					Some(holder) => self.expire_requests(&listing, Some(&holder.id), now, report),
					None => Ok(()),
				}
			}
		}
	}

	fn expire_requests(
		&self,
		listing: &Listing,
		keep: Option<&str>,
		now: Timestamp,
		report: &mut SweepReport,
	) -> Result<(), ReservationError> {
		let expired = self
			.stores
			.reservations
			.expire_pending_for_listing(&listing.id, keep, now)?;

		for reservation in &expired {
			if listing.status == ListingStatus::Expired {
				self.notifier
					.listing_expired_for_recipient(listing, reservation);
			} else {
				self.notifier.request_unavailable(listing, reservation);
			}
		}
		report.reservations_expired += expired.len();

		Ok(())
	}

	/// Run sweeps on a dedicated thread until the handle is shut down
	pub fn start(
		self: Arc<Self>,
		interval: Duration,
		sweep_on_start: bool,
	) -> std::io::Result<SweeperHandle> {
		let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
		let runs = Arc::new(AtomicU64::new(0));
		let runs_clone = runs.clone();

		let thread_handle = thread::Builder::new()
			.name("expiration-sweeper".to_string())
			.spawn(move || {
				info!(
					target: "sweeper",
					interval_secs = interval.as_secs(),
					"Expiration sweeper started"
				);

				if sweep_on_start {
					self.run_once(&runs_clone);
				}
				loop {
					match shutdown_rx.recv_timeout(interval) {
						Err(RecvTimeoutError::Timeout) => self.run_once(&runs_clone),
						Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
					}
				}

				info!(target: "sweeper", "Expiration sweeper stopped");
			})?;

		Ok(SweeperHandle {
			thread_handle: Some(thread_handle),
			shutdown_tx: Some(shutdown_tx),
			runs,
		})
	}

	fn run_once(&self, runs: &AtomicU64) {
		if let Err(e) = self.sweep() {
			error!(target: "sweeper", error = %e, "Sweep failed");
		}
		runs.fetch_add(1, Ordering::Relaxed);
	}
}

/// Handle to the background sweep loop; dropping it stops the loop
pub struct SweeperHandle {
	thread_handle: Option<JoinHandle<()>>,
	shutdown_tx: Option<Sender<()>>,
	runs: Arc<AtomicU64>,
}

impl SweeperHandle {
	/// Number of sweeps finished so far, failed ones included
	pub fn completed_runs(&self) -> u64 {
		self.runs.load(Ordering::Relaxed)
	}

	pub fn shutdown(mut self) {
		info!(target: "sweeper", "Shutting down expiration sweeper");
		self.stop();
	}

	fn stop(&mut self) {
		// Dropping the sender wakes the loop immediately
		self.shutdown_tx.take();

		if let Some(handle) = self.thread_handle.take()
			&& let Err(e) = handle.join()
		{
			warn!(target: "sweeper", error = ?e, "Sweeper thread panicked");
		}
	}
}

impl Drop for SweeperHandle {
	fn drop(&mut self) {
		self.stop();
	}
}
