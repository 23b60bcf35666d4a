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

//! Collaborator interfaces
//!
//! The authoritative state lives in an external relational store shared by
//! every client and by the sweeper. These traits describe the operations the
//! engine relies on. Each call is one round trip whose write either commits
//! or does not; no lock is held across calls.
//!
//! Conditional updates (`transition_*`) only apply when the row is currently
//! in the expected status and return the updated row, or `None` when zero
//! rows matched. That is the primitive every race guard is built on.

mod memory;

use std::sync::Arc;

use saveplate_sdk::{
	Actor, DonationRecord, Listing, ListingId, ListingStatus, Notification, Profile, Reservation,
	ReservationStatus, Timestamp,
};
use thiserror::Error;

pub use memory::MemoryStore;

/// Error types for store operations
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Store unavailable: {0}")]
	Unavailable(String),
	#[error("Unique constraint violated: {0}")]
	UniqueViolation(String),
	#[error("Table lock poisoned: {0}")]
	Poisoned(&'static str),
}

pub trait ListingStore: Send + Sync {
	/// Insert a new listing row
	fn insert_listing(&self, listing: Listing) -> Result<Listing, StoreError>;

	fn listing(&self, id: &str) -> Result<Option<Listing>, StoreError>;

	/// A donor's listings, newest first
	fn listings_for_donor(&self, donor_id: &str) -> Result<Vec<Listing>, StoreError>;

	/// `status = available and expiration < now`
	fn available_expired_before(&self, now: Timestamp) -> Result<Vec<Listing>, StoreError>;

	/// `update ... set status = to where id = ? and status = from`
	fn transition_listing(
		&self,
		id: &str,
		from: ListingStatus,
		to: ListingStatus,
		at: Timestamp,
	) -> Result<Option<Listing>, StoreError>;
}

pub trait ReservationStore: Send + Sync {
	/// Insert a `pending` reservation
	///
	/// Enforces uniqueness of active (pending or confirmed) reservations per
	/// `(food_listing_id, recipient_id)`; a clash is `UniqueViolation`.
	fn insert_pending(&self, reservation: Reservation) -> Result<Reservation, StoreError>;

	fn reservation(&self, id: &str) -> Result<Option<Reservation>, StoreError>;

	/// Reservations on one listing, oldest first
	fn reservations_for_listing(&self, listing_id: &str) -> Result<Vec<Reservation>, StoreError>;

	/// Reservations on any of the listings, oldest first
	fn reservations_for_listings(
		&self,
		listing_ids: &[ListingId],
	) -> Result<Vec<Reservation>, StoreError>;

	/// A recipient's reservations, oldest first
	fn reservations_for_recipient(
		&self,
		recipient_id: &str,
	) -> Result<Vec<Reservation>, StoreError>;

	fn reservations_with_status(
		&self,
		status: ReservationStatus,
	) -> Result<Vec<Reservation>, StoreError>;

	/// `update ... set status = to where id = ? and status = from`
	fn transition_reservation(
		&self,
		id: &str,
		from: ReservationStatus,
		to: ReservationStatus,
		at: Timestamp,
	) -> Result<Option<Reservation>, StoreError>;

	/// `update ... set status = 'expired' where food_listing_id = ? and status = 'pending'`,
	/// optionally sparing one row; returns the affected rows
	fn expire_pending_for_listing(
		&self,
		listing_id: &str,
		except: Option<&str>,
		at: Timestamp,
	) -> Result<Vec<Reservation>, StoreError>;
}

pub trait NotificationStore: Send + Sync {
	fn insert_notification(&self, notification: Notification) -> Result<Notification, StoreError>;

	fn notification(&self, id: &str) -> Result<Option<Notification>, StoreError>;

	/// A user's notifications, newest first
	fn notifications_for_user(
		&self,
		user_id: &str,
		limit: usize,
	) -> Result<Vec<Notification>, StoreError>;

	fn mark_read(&self, id: &str) -> Result<Option<Notification>, StoreError>;

	/// Returns the number of rows changed
	fn mark_all_read(&self, user_id: &str) -> Result<usize, StoreError>;

	fn delete_notification(&self, id: &str) -> Result<Option<Notification>, StoreError>;
}

pub trait DonationLedger: Send + Sync {
	fn record_donation(&self, record: DonationRecord) -> Result<(), StoreError>;

	fn donations_for_donor(&self, donor_id: &str) -> Result<Vec<DonationRecord>, StoreError>;
}

pub trait ProfileStore: Send + Sync {
	fn insert_profile(&self, profile: Profile) -> Result<(), StoreError>;

	fn profile(&self, id: &str) -> Result<Option<Profile>, StoreError>;
}

/// Session-based authentication
pub trait SessionAuth: Send + Sync {
	fn current_user(&self, token: &str) -> Result<Option<Actor>, StoreError>;
}

/// Handles to every collaborator interface the engine uses
#[derive(Clone)]
pub struct Stores {
	pub listings: Arc<dyn ListingStore>,
	pub reservations: Arc<dyn ReservationStore>,
	pub notifications: Arc<dyn NotificationStore>,
	pub donations: Arc<dyn DonationLedger>,
	pub profiles: Arc<dyn ProfileStore>,
	pub sessions: Arc<dyn SessionAuth>,
}

impl Stores {
	/// Back every interface with the same in-memory store
	pub fn from_memory(store: Arc<MemoryStore>) -> Self {
		Self {
			listings: store.clone(),
			reservations: store.clone(),
			notifications: store.clone(),
			donations: store.clone(),
			profiles: store.clone(),
			sessions: store,
		}
	}
}

pub(crate) fn new_row_id() -> String {
	uuid::Uuid::new_v4().to_string()
}
