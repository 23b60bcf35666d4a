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

use std::{
	collections::HashMap,
	sync::{
		Arc, Mutex, MutexGuard,
		atomic::{AtomicU64, Ordering},
	},
};

use dashmap::{DashMap, mapref::entry::Entry};
use saveplate_sdk::{
	Actor, DonationRecord, Listing, ListingId, ListingStatus, Notification, NotificationId,
	Profile, Reservation, ReservationId, ReservationStatus, Timestamp, UserId,
};
use tracing::debug;

use super::{
	DonationLedger, ListingStore, NotificationStore, ProfileStore, ReservationStore, SessionAuth,
	StoreError, new_row_id,
};
use crate::feed::{ChangeFeed, ChangeKind, ChangeRow};

/// Row plus its insertion sequence, used to break `created_at` ties
struct StoredRow<T> {
	seq: u64,
	row: T,
}

#[derive(Default)]
struct ReservationTable {
	rows: HashMap<ReservationId, StoredRow<Reservation>>,
	/// Unique index over active `(food_listing_id, recipient_id)` pairs
	active: HashMap<(ListingId, UserId), ReservationId>,
}

impl ReservationTable {
	fn release(&mut self, reservation: &Reservation) {
		let key = (
			reservation.food_listing_id.clone(),
			reservation.recipient_id.clone(),
		);
		if self.active.get(&key) == Some(&reservation.id) {
			self.active.remove(&key);
		}
	}

	fn sorted<'a>(rows: impl Iterator<Item = &'a StoredRow<Reservation>>) -> Vec<Reservation> {
		let mut rows: Vec<_> = rows.collect();
		rows.sort_by(|a, b| (a.row.created_at, a.seq).cmp(&(b.row.created_at, b.seq)));
		rows.into_iter().map(|stored| stored.row.clone()).collect()
	}
}

/// In-memory implementation of every collaborator interface
///
/// Stands in for the managed database in tests and local runs. Listings are
/// guarded per row (a `DashMap` shard lock covers each conditional update);
/// reservations and notifications are guarded per table so the unique active
/// index can be checked and written in one step.
///
/// Every committed write publishes its change event before releasing the
/// lock it was made under.
///
/// Lock order: reservation table, then listing rows, then the feed. Listing
/// writes never take the reservation table.
pub struct MemoryStore {
	listings: DashMap<ListingId, Listing>,
	reservations: Mutex<ReservationTable>,
	notifications: Mutex<HashMap<NotificationId, StoredRow<Notification>>>,
	donations: Mutex<Vec<DonationRecord>>,
	profiles: DashMap<UserId, Profile>,
	sessions: DashMap<String, UserId>,
	feed: Arc<ChangeFeed>,
	next_row: AtomicU64,
}

impl MemoryStore {
	pub fn new(feed: Arc<ChangeFeed>) -> Self {
		Self {
			listings: DashMap::new(),
			reservations: Mutex::new(ReservationTable::default()),
			notifications: Mutex::new(HashMap::new()),
			donations: Mutex::new(Vec::new()),
			profiles: DashMap::new(),
			sessions: DashMap::new(),
			feed,
			next_row: AtomicU64::new(0),
		}
	}

	pub fn feed(&self) -> &Arc<ChangeFeed> {
		&self.feed
	}

	/// Start a session for a user and return its token
	pub fn open_session(&self, user_id: &str) -> String {
		let token = new_row_id();
		self.sessions.insert(token.clone(), user_id.to_string());
		token
	}

	pub fn close_session(&self, token: &str) {
		self.sessions.remove(token);
	}

	fn next_row(&self) -> u64 {
		self.next_row.fetch_add(1, Ordering::Relaxed) + 1
	}

	fn reservation_audience(&self, reservation: &Reservation) -> Vec<UserId> {
		let mut audience = vec![reservation.recipient_id.clone()];
		if let Some(listing) = self.listings.get(&reservation.food_listing_id) {
			audience.push(listing.donor_id.clone());
		}
		audience
	}

	fn publish_reservation(
		&self,
		kind: ChangeKind,
		reservation: &Reservation,
		previous: Option<ReservationStatus>,
	) {
		let audience = self.reservation_audience(reservation);
		self.feed.publish(
			kind,
			ChangeRow::Reservation(reservation.clone()),
			previous.map(|s| s.as_str()),
			audience,
		);
	}

	fn lock_reservations(&self) -> Result<MutexGuard<'_, ReservationTable>, StoreError> {
		self.reservations
			.lock()
			.map_err(|_| StoreError::Poisoned("reservations"))
	}

	fn lock_notifications(
		&self,
	) -> Result<MutexGuard<'_, HashMap<NotificationId, StoredRow<Notification>>>, StoreError> {
		self.notifications
			.lock()
			.map_err(|_| StoreError::Poisoned("notifications"))
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new(Arc::new(ChangeFeed::default()))
	}
}

impl ListingStore for MemoryStore {
	fn insert_listing(&self, listing: Listing) -> Result<Listing, StoreError> {
		match self.listings.entry(listing.id.clone()) {
			Entry::Occupied(_) => Err(StoreError::UniqueViolation(format!(
				"listing {} already exists",
				listing.id
			))),
			Entry::Vacant(slot) => {
				let audience = vec![listing.donor_id.clone()];
				let row = slot.insert(listing);
				let inserted = row.value().clone();
				self.feed.publish(
					ChangeKind::Insert,
					ChangeRow::Listing(inserted.clone()),
					None,
					audience,
				);
				drop(row);
				Ok(inserted)
			}
		}
	}

	fn listing(&self, id: &str) -> Result<Option<Listing>, StoreError> {
		Ok(self.listings.get(id).map(|l| l.value().clone()))
	}

	fn listings_for_donor(&self, donor_id: &str) -> Result<Vec<Listing>, StoreError> {
		let mut listings: Vec<Listing> = self
			.listings
			.iter()
			.filter(|l| l.donor_id == donor_id)
			.map(|l| l.value().clone())
			.collect();
		listings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
		Ok(listings)
	}

	fn available_expired_before(&self, now: Timestamp) -> Result<Vec<Listing>, StoreError> {
		Ok(self
			.listings
			.iter()
			.filter(|l| l.status == ListingStatus::Available && l.expiration < now)
			.map(|l| l.value().clone())
			.collect())
	}

	fn transition_listing(
		&self,
		id: &str,
		from: ListingStatus,
		to: ListingStatus,
		at: Timestamp,
	) -> Result<Option<Listing>, StoreError> {
		let Some(mut entry) = self.listings.get_mut(id) else {
			return Ok(None);
		};
		if entry.status != from {
			debug!(
				target: "store",
				listing_id = %id,
				expected = %from,
				actual = %entry.status,
				"Conditional listing update matched zero rows"
			);
			return Ok(None);
		}

		entry.status = to;
		entry.updated_at = at;
		let updated = entry.value().clone();
		self.feed.publish(
			ChangeKind::Update,
			ChangeRow::Listing(updated.clone()),
			Some(from.as_str()),
			vec![updated.donor_id.clone()],
		);
		drop(entry);

		Ok(Some(updated))
	}
}

impl ReservationStore for MemoryStore {
	fn insert_pending(&self, mut reservation: Reservation) -> Result<Reservation, StoreError> {
		let mut table = self.lock_reservations()?;

		let key = (
			reservation.food_listing_id.clone(),
			reservation.recipient_id.clone(),
		);
		if table.active.contains_key(&key) {
			return Err(StoreError::UniqueViolation(
				"recipient already has an active request for this listing".to_string(),
			));
		}
		if table.rows.contains_key(&reservation.id) {
			return Err(StoreError::UniqueViolation(format!(
				"reservation {} already exists",
				reservation.id
			)));
		}

		reservation.status = ReservationStatus::Pending;
		let seq = self.next_row();
		table.active.insert(key, reservation.id.clone());
		table.rows.insert(
			reservation.id.clone(),
			StoredRow {
				seq,
				row: reservation.clone(),
			},
		);
		self.publish_reservation(ChangeKind::Insert, &reservation, None);

		Ok(reservation)
	}

	fn reservation(&self, id: &str) -> Result<Option<Reservation>, StoreError> {
		let table = self.lock_reservations()?;
		Ok(table.rows.get(id).map(|stored| stored.row.clone()))
	}

	fn reservations_for_listing(&self, listing_id: &str) -> Result<Vec<Reservation>, StoreError> {
		let table = self.lock_reservations()?;
		Ok(ReservationTable::sorted(
			table
				.rows
				.values()
				.filter(|stored| stored.row.food_listing_id == listing_id),
		))
	}

	fn reservations_for_listings(
		&self,
		listing_ids: &[ListingId],
	) -> Result<Vec<Reservation>, StoreError> {
		let table = self.lock_reservations()?;
		Ok(ReservationTable::sorted(
			table
				.rows
				.values()
				.filter(|stored| listing_ids.contains(&stored.row.food_listing_id)),
		))
	}

	fn reservations_for_recipient(
		&self,
		recipient_id: &str,
	) -> Result<Vec<Reservation>, StoreError> {
		let table = self.lock_reservations()?;
		Ok(ReservationTable::sorted(
			table
				.rows
				.values()
				.filter(|stored| stored.row.recipient_id == recipient_id),
		))
	}

	fn reservations_with_status(
		&self,
		status: ReservationStatus,
	) -> Result<Vec<Reservation>, StoreError> {
		let table = self.lock_reservations()?;
		Ok(ReservationTable::sorted(
			table.rows.values().filter(|stored| stored.row.status == status),
		))
	}

	fn transition_reservation(
		&self,
		id: &str,
		from: ReservationStatus,
		to: ReservationStatus,
		at: Timestamp,
	) -> Result<Option<Reservation>, StoreError> {
		let mut table = self.lock_reservations()?;

		let updated = match table.rows.get_mut(id) {
			Some(stored) if stored.row.status == from => {
				stored.row.status = to;
				stored.row.updated_at = at;
				stored.row.clone()
			}
			Some(stored) => {
				debug!(
					target: "store",
					reservation_id = %id,
					expected = %from,
					actual = %stored.row.status,
					"Conditional reservation update matched zero rows"
				);
				return Ok(None);
			}
			None => return Ok(None),
		};

		if to.is_terminal() {
			table.release(&updated);
		}
		self.publish_reservation(ChangeKind::Update, &updated, Some(from));

		Ok(Some(updated))
	}

	fn expire_pending_for_listing(
		&self,
		listing_id: &str,
		except: Option<&str>,
		at: Timestamp,
	) -> Result<Vec<Reservation>, StoreError> {
		let mut table = self.lock_reservations()?;

		let mut targets: Vec<(u64, ReservationId)> = table
			.rows
			.values()
			.filter(|stored| {
				stored.row.food_listing_id == listing_id
					&& stored.row.status == ReservationStatus::Pending
					&& except != Some(stored.row.id.as_str())
			})
			.map(|stored| (stored.seq, stored.row.id.clone()))
			.collect();
		targets.sort();

		let mut expired = Vec::with_capacity(targets.len());
		for (_, id) in targets {
			let Some(stored) = table.rows.get_mut(&id) else {
				continue;
			};
			stored.row.status = ReservationStatus::Expired;
			stored.row.updated_at = at;
			let updated = stored.row.clone();

			table.release(&updated);
			self.publish_reservation(
				ChangeKind::Update,
				&updated,
				Some(ReservationStatus::Pending),
			);
			expired.push(updated);
		}

		Ok(expired)
	}
}

impl NotificationStore for MemoryStore {
	fn insert_notification(&self, notification: Notification) -> Result<Notification, StoreError> {
		let mut table = self.lock_notifications()?;
		if table.contains_key(&notification.id) {
			return Err(StoreError::UniqueViolation(format!(
				"notification {} already exists",
				notification.id
			)));
		}

		let seq = self.next_row();
		table.insert(
			notification.id.clone(),
			StoredRow {
				seq,
				row: notification.clone(),
			},
		);
		self.feed.publish(
			ChangeKind::Insert,
			ChangeRow::Notification(notification.clone()),
			None,
			vec![notification.user_id.clone()],
		);

		Ok(notification)
	}

	fn notification(&self, id: &str) -> Result<Option<Notification>, StoreError> {
		let table = self.lock_notifications()?;
		Ok(table.get(id).map(|stored| stored.row.clone()))
	}

	fn notifications_for_user(
		&self,
		user_id: &str,
		limit: usize,
	) -> Result<Vec<Notification>, StoreError> {
		let table = self.lock_notifications()?;
		let mut rows: Vec<_> = table
			.values()
			.filter(|stored| stored.row.user_id == user_id)
			.collect();
		rows.sort_by(|a, b| (b.row.created_at, b.seq).cmp(&(a.row.created_at, a.seq)));
		Ok(rows
			.into_iter()
			.take(limit)
			.map(|stored| stored.row.clone())
			.collect())
	}

	fn mark_read(&self, id: &str) -> Result<Option<Notification>, StoreError> {
		let mut table = self.lock_notifications()?;
		let Some(stored) = table.get_mut(id) else {
			return Ok(None);
		};

		if !stored.row.read {
			stored.row.read = true;
			self.feed.publish(
				ChangeKind::Update,
				ChangeRow::Notification(stored.row.clone()),
				None,
				vec![stored.row.user_id.clone()],
			);
		}

		Ok(Some(stored.row.clone()))
	}

	fn mark_all_read(&self, user_id: &str) -> Result<usize, StoreError> {
		let mut table = self.lock_notifications()?;
		let mut changed = 0;

		for stored in table
			.values_mut()
			.filter(|stored| stored.row.user_id == user_id && !stored.row.read)
		{
			stored.row.read = true;
			self.feed.publish(
				ChangeKind::Update,
				ChangeRow::Notification(stored.row.clone()),
				None,
				vec![stored.row.user_id.clone()],
			);
			changed += 1;
		}

		Ok(changed)
	}

	fn delete_notification(&self, id: &str) -> Result<Option<Notification>, StoreError> {
		let mut table = self.lock_notifications()?;
		let Some(stored) = table.remove(id) else {
			return Ok(None);
		};

		self.feed.publish(
			ChangeKind::Delete,
			ChangeRow::Notification(stored.row.clone()),
			None,
			vec![stored.row.user_id.clone()],
		);

		Ok(Some(stored.row))
	}
}

impl DonationLedger for MemoryStore {
	fn record_donation(&self, record: DonationRecord) -> Result<(), StoreError> {
		self.donations
			.lock()
			.map_err(|_| StoreError::Poisoned("donation_history"))?
			.push(record);
		Ok(())
	}

	fn donations_for_donor(&self, donor_id: &str) -> Result<Vec<DonationRecord>, StoreError> {
		Ok(self
			.donations
			.lock()
			.map_err(|_| StoreError::Poisoned("donation_history"))?
			.iter()
			.filter(|record| record.donor_id == donor_id)
			.cloned()
			.collect())
	}
}

impl ProfileStore for MemoryStore {
	fn insert_profile(&self, profile: Profile) -> Result<(), StoreError> {
		self.profiles.insert(profile.id.clone(), profile);
		Ok(())
	}

	fn profile(&self, id: &str) -> Result<Option<Profile>, StoreError> {
		Ok(self.profiles.get(id).map(|p| p.value().clone()))
	}
}

impl SessionAuth for MemoryStore {
	fn current_user(&self, token: &str) -> Result<Option<Actor>, StoreError> {
		let Some(user_id) = self.sessions.get(token).map(|u| u.value().clone()) else {
			return Ok(None);
		};
		Ok(self.profiles.get(&user_id).map(|profile| Actor {
			id: profile.id.clone(),
			role: profile.role,
		}))
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use chrono::{Duration, Utc};
	use saveplate_sdk::{NotificationKind, Role};

	use super::*;
	use crate::feed::{RowFilter, SubscriptionFilter};

	fn create_test_listing(id: &str, donor: &str) -> Listing {
		let now = Utc::now();
		Listing {
			id: id.to_string(),
			donor_id: donor.to_string(),
			title: "Soup".to_string(),
			description: None,
			quantity: "10 portions".to_string(),
			category: "prepared".to_string(),
			location: "Community kitchen".to_string(),
			pickup_instructions: None,
			status: ListingStatus::Available,
			expiration: now + Duration::hours(1),
			pickup_time_start: None,
			pickup_time_end: None,
			allergens: BTreeSet::new(),
			created_at: now,
			updated_at: now,
		}
	}

	fn create_test_reservation(id: &str, listing: &str, recipient: &str) -> Reservation {
		let now = Utc::now();
		Reservation {
			id: id.to_string(),
			food_listing_id: listing.to_string(),
			recipient_id: recipient.to_string(),
			status: ReservationStatus::Pending,
			note: None,
			created_at: now,
			updated_at: now,
		}
	}

	fn create_test_notification(id: &str, user: &str) -> Notification {
		Notification {
			id: id.to_string(),
			user_id: user.to_string(),
			title: "Hello".to_string(),
			message: "World".to_string(),
			kind: NotificationKind::FoodRequested,
			read: false,
			food_listing_id: None,
			reservation_id: None,
			created_at: Utc::now(),
		}
	}

	#[test]
	fn test_conditional_listing_update() {
		let store = MemoryStore::default();
		store.insert_listing(create_test_listing("listing_1", "donor_1")).unwrap();

		let now = Utc::now();
		let first = store
			.transition_listing("listing_1", ListingStatus::Available, ListingStatus::Reserved, now)
			.unwrap();
		assert_eq!(first.unwrap().status, ListingStatus::Reserved);

		let second = store
			.transition_listing("listing_1", ListingStatus::Available, ListingStatus::Reserved, now)
			.unwrap();
		assert!(second.is_none());

		let missing = store
			.transition_listing("missing", ListingStatus::Available, ListingStatus::Expired, now)
			.unwrap();
		assert!(missing.is_none());
	}

	#[test]
	fn test_duplicate_listing_rejected() {
		let store = MemoryStore::default();
		store.insert_listing(create_test_listing("listing_1", "donor_1")).unwrap();
		let result = store.insert_listing(create_test_listing("listing_1", "donor_1"));
		assert!(matches!(result, Err(StoreError::UniqueViolation(_))));
	}

	#[test]
	fn test_active_pair_is_unique_until_released() {
		let store = MemoryStore::default();
		store.insert_listing(create_test_listing("listing_1", "donor_1")).unwrap();
		store
			.insert_pending(create_test_reservation("r1", "listing_1", "alice"))
			.unwrap();

		let duplicate = store.insert_pending(create_test_reservation("r2", "listing_1", "alice"));
		assert!(matches!(duplicate, Err(StoreError::UniqueViolation(_))));

		// A different recipient may still request the same listing
		store
			.insert_pending(create_test_reservation("r3", "listing_1", "bob"))
			.unwrap();

		store
			.transition_reservation(
				"r1",
				ReservationStatus::Pending,
				ReservationStatus::Expired,
				Utc::now(),
			)
			.unwrap()
			.unwrap();
		store
			.insert_pending(create_test_reservation("r4", "listing_1", "alice"))
			.unwrap();
	}

	#[test]
	fn test_confirmed_reservation_still_blocks_pair() {
		let store = MemoryStore::default();
		store.insert_listing(create_test_listing("listing_1", "donor_1")).unwrap();
		store
			.insert_pending(create_test_reservation("r1", "listing_1", "alice"))
			.unwrap();
		store
			.transition_reservation(
				"r1",
				ReservationStatus::Pending,
				ReservationStatus::Confirmed,
				Utc::now(),
			)
			.unwrap()
			.unwrap();

		let duplicate = store.insert_pending(create_test_reservation("r2", "listing_1", "alice"));
		assert!(matches!(duplicate, Err(StoreError::UniqueViolation(_))));
	}

	#[test]
	fn test_expire_pending_spares_exception() {
		let store = MemoryStore::default();
		store.insert_listing(create_test_listing("listing_1", "donor_1")).unwrap();
		for (id, recipient) in [("r1", "alice"), ("r2", "bob"), ("r3", "carol")] {
			store
				.insert_pending(create_test_reservation(id, "listing_1", recipient))
				.unwrap();
		}

		let expired = store
			.expire_pending_for_listing("listing_1", Some("r2"), Utc::now())
			.unwrap();
		let ids: Vec<_> = expired.iter().map(|r| r.id.as_str()).collect();
		assert_eq!(ids, vec!["r1", "r3"]);

		let spared = store.reservation("r2").unwrap().unwrap();
		assert_eq!(spared.status, ReservationStatus::Pending);

		let again = store
			.expire_pending_for_listing("listing_1", Some("r2"), Utc::now())
			.unwrap();
		assert!(again.is_empty());
	}

	#[test]
	fn test_reservation_events_reach_donor_and_recipient() {
		let store = MemoryStore::default();
		let donor = store.feed().subscribe(SubscriptionFilter::for_user("donor_1"));
		let recipient = store.feed().subscribe(SubscriptionFilter::for_user("alice"));

		store.insert_listing(create_test_listing("listing_1", "donor_1")).unwrap();
		store
			.insert_pending(create_test_reservation("r1", "listing_1", "alice"))
			.unwrap();

		assert_eq!(donor.drain().len(), 2);
		assert_eq!(recipient.drain().len(), 1);
	}

	#[test]
	fn test_notifications_newest_first_and_mark_all_read() {
		let store = MemoryStore::default();
		for i in 0..3 {
			store
				.insert_notification(create_test_notification(&format!("n{}", i), "alice"))
				.unwrap();
		}
		store
			.insert_notification(create_test_notification("other", "bob"))
			.unwrap();

		let page = store.notifications_for_user("alice", 2).unwrap();
		let ids: Vec<_> = page.iter().map(|n| n.id.as_str()).collect();
		assert_eq!(ids, vec!["n2", "n1"]);

		assert_eq!(store.mark_all_read("alice").unwrap(), 3);
		assert_eq!(store.mark_all_read("alice").unwrap(), 0);
		assert!(!store.notification("other").unwrap().unwrap().read);
	}

	#[test]
	fn test_delete_notification_publishes_delete() {
		let store = MemoryStore::default();
		let all = store.feed().subscribe(SubscriptionFilter::new(RowFilter::Any));
		store
			.insert_notification(create_test_notification("n1", "alice"))
			.unwrap();

		assert!(store.delete_notification("n1").unwrap().is_some());
		assert!(store.delete_notification("n1").unwrap().is_none());

		let kinds: Vec<_> = all.drain().iter().map(|e| e.kind).collect();
		assert_eq!(kinds, vec![ChangeKind::Insert, ChangeKind::Delete]);
	}

	#[test]
	fn test_session_resolves_profile_role() {
		let store = MemoryStore::default();
		store
			.insert_profile(Profile {
				id: "alice".to_string(),
				role: Role::Recipient,
				first_name: "Alice".to_string(),
				last_name: "Smith".to_string(),
			})
			.unwrap();

		let token = store.open_session("alice");
		let actor = store.current_user(&token).unwrap().unwrap();
		assert_eq!(actor, Actor::recipient("alice"));

		store.close_session(&token);
		assert!(store.current_user(&token).unwrap().is_none());
		assert!(store.current_user("bogus").unwrap().is_none());
	}
}
