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

#![allow(dead_code)]

use std::{collections::BTreeSet, sync::Arc};

use chrono::{TimeDelta, Utc};
use saveplate_reservation::{
	ChangeFeed, ChangeNotifier, DashboardQueries, ExpirationSweeper, MemoryStore,
	ReservationOrchestrator, StoreError, Stores,
	lifecycle::new_listing_record,
	store::{ListingStore, NotificationStore, ProfileStore, ReservationStore},
};
use saveplate_sdk::{
	Actor, Listing, ListingId, ListingStatus, NewListing, Profile, Reservation, ReservationStatus,
	Role, Timestamp,
};

pub struct Harness {
	pub feed: Arc<ChangeFeed>,
	pub store: Arc<MemoryStore>,
	pub stores: Stores,
	pub notifier: Arc<ChangeNotifier>,
	pub orchestrator: ReservationOrchestrator,
	pub sweeper: ExpirationSweeper,
	pub queries: DashboardQueries,
}

pub fn setup() -> Harness {
	setup_with(None)
}

/// Build the engine, optionally replacing the notification store
pub fn setup_with(
	notifications: Option<Arc<dyn NotificationStore>>,
) -> Harness {
	setup_with_stores(|stores, _| {
		if let Some(notifications) = notifications {
			stores.notifications = notifications;
		}
	})
}

/// Build the engine with reservation writes going through [`FaultyReservations`]
pub fn setup_with_fault(fault: Fault) -> Harness {
	setup_with_stores(|stores, store| {
		stores.reservations = Arc::new(FaultyReservations {
			inner: store.clone(),
			fault,
		});
	})
}

pub fn setup_with_stores(customize: impl FnOnce(&mut Stores, &Arc<MemoryStore>)) -> Harness {
	let feed = Arc::new(ChangeFeed::new(1_024));
	let store = Arc::new(MemoryStore::new(feed.clone()));
	let mut stores = Stores::from_memory(store.clone());
	customize(&mut stores, &store);
	let notifier = Arc::new(ChangeNotifier::new(stores.notifications.clone(), 50));

	Harness {
		feed,
		store,
		orchestrator: ReservationOrchestrator::new(stores.clone(), notifier.clone()),
		sweeper: ExpirationSweeper::new(stores.clone(), notifier.clone()),
		queries: DashboardQueries::new(stores.clone()),
		stores,
		notifier,
	}
}

pub fn create_test_new_listing(title: &str) -> NewListing {
	NewListing {
		title: title.to_string(),
		description: Some("Surplus from today's service".to_string()),
		quantity: "20 portions".to_string(),
		category: "prepared".to_string(),
		location: "12 Harbour Rd".to_string(),
		pickup_instructions: Some("Back door".to_string()),
		expiration: Utc::now() + TimeDelta::hours(1),
		pickup_time_start: None,
		pickup_time_end: None,
		allergens: BTreeSet::new(),
	}
}

impl Harness {
	pub fn post(&self, donor: &Actor) -> Listing {
		self.orchestrator
			.post_listing(donor, create_test_new_listing("Vegetable curry"))
			.unwrap()
	}

	/// Insert an `available` listing whose expiration has already passed
	pub fn insert_stale_listing(&self, donor: &Actor) -> Listing {
		let created = Utc::now() - TimeDelta::hours(2);
		let mut listing =
			new_listing_record(&donor.id, create_test_new_listing("Sourdough"), created);
		listing.expiration = Utc::now() - TimeDelta::minutes(1);
		self.store.insert_listing(listing).unwrap()
	}

	pub fn add_profile(&self, id: &str, role: Role, first: &str, last: &str) {
		self.store
			.insert_profile(Profile {
				id: id.to_string(),
				role,
				first_name: first.to_string(),
				last_name: last.to_string(),
			})
			.unwrap();
	}

	pub fn listing_status(&self, id: &str) -> ListingStatus {
		self.store.listing(id).unwrap().unwrap().status
	}

	pub fn reservation_status(&self, id: &str) -> ReservationStatus {
		self.store.reservation(id).unwrap().unwrap().status
	}

	pub fn active_on(&self, listing_id: &str) -> usize {
		self.store
			.reservations_for_listing(listing_id)
			.unwrap()
			.iter()
			.filter(|r| r.status.is_active())
			.count()
	}
}

/// Write failure injected by [`FaultyReservations`]
#[derive(Debug, Clone, Copy)]
pub enum Fault {
	/// The conditional update matches zero rows
	Refuse(ReservationStatus, ReservationStatus),
	/// The conditional update fails in the store
	Fail(ReservationStatus, ReservationStatus),
	/// Bulk expiry of pending requests fails in the store
	FailSiblingExpiry,
}

/// Reservation store that injects one kind of write failure and otherwise
/// forwards to the in-memory store
pub struct FaultyReservations {
	inner: Arc<MemoryStore>,
	fault: Fault,
}

impl ReservationStore for FaultyReservations {
	fn insert_pending(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
		self.inner.insert_pending(reservation)
	}

	fn reservation(&self, id: &str) -> Result<Option<Reservation>, StoreError> {
		ReservationStore::reservation(self.inner.as_ref(), id)
	}

	fn reservations_for_listing(&self, listing_id: &str) -> Result<Vec<Reservation>, StoreError> {
		self.inner.reservations_for_listing(listing_id)
	}

	fn reservations_for_listings(
		&self,
		listing_ids: &[ListingId],
	) -> Result<Vec<Reservation>, StoreError> {
		self.inner.reservations_for_listings(listing_ids)
	}

	fn reservations_for_recipient(
		&self,
		recipient_id: &str,
	) -> Result<Vec<Reservation>, StoreError> {
		self.inner.reservations_for_recipient(recipient_id)
	}

	fn reservations_with_status(
		&self,
		status: ReservationStatus,
	) -> Result<Vec<Reservation>, StoreError> {
		self.inner.reservations_with_status(status)
	}

	fn transition_reservation(
		&self,
		id: &str,
		from: ReservationStatus,
		to: ReservationStatus,
		at: Timestamp,
	) -> Result<Option<Reservation>, StoreError> {
		match self.fault {
			Fault::Refuse(f, t) if (f, t) == (from, to) => Ok(None),
			Fault::Fail(f, t) if (f, t) == (from, to) => {
				Err(StoreError::Unavailable("write timed out".to_string()))
			}
			_ => self.inner.transition_reservation(id, from, to, at),
		}
	}

	fn expire_pending_for_listing(
		&self,
		listing_id: &str,
		except: Option<&str>,
		at: Timestamp,
	) -> Result<Vec<Reservation>, StoreError> {
		if let Fault::FailSiblingExpiry = self.fault {
			return Err(StoreError::Unavailable("write timed out".to_string()));
		}
		self.inner.expire_pending_for_listing(listing_id, except, at)
	}
}
