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

//! Local dashboard projection
//!
//! A dashboard keeps a copy of the rows it displays and patches it as change
//! events arrive. The copy is never authoritative: it is rebuilt from the
//! query side whenever in doubt and simply dropped when the dashboard goes
//! away.
//!
//! Subscribe before loading so no commit falls between the two. The feed
//! sequence read between subscribing and loading is the projection's
//! baseline: everything at or below it is already in the loaded rows.
//! Later events replace a row whenever they carry a higher sequence than the
//! version held for it. The feed delivers each row's changes in commit
//! order, so this also follows compensating writes that move a status
//! backwards.

use std::collections::HashMap;

use saveplate_sdk::{
	Actor, Listing, ListingId, Notification, NotificationId, Reservation, ReservationId,
	ReservationStatus, Role, UserId,
};
use tracing::debug;

use crate::{
	error::ReservationError,
	feed::{
		ChangeEvent, ChangeFeed, ChangeKind, ChangeRow, SequenceNumber, Subscription,
		SubscriptionFilter, Table,
	},
	notifier::ChangeNotifier,
	queries::DashboardQueries,
};

pub struct DashboardProjection {
	user_id: UserId,
	listings: HashMap<ListingId, Listing>,
	reservations: HashMap<ReservationId, Reservation>,
	notifications: HashMap<NotificationId, Notification>,
	/// Sequence of the version held for each row, keyed by table and id
	versions: HashMap<(Table, String), SequenceNumber>,
	baseline: SequenceNumber,
	last_seq: SequenceNumber,
}

impl DashboardProjection {
	/// Subscribe to the user's changes and load their current dashboard rows
	pub fn open(
		feed: &ChangeFeed,
		queries: &DashboardQueries,
		notifier: &ChangeNotifier,
		actor: &Actor,
	) -> Result<(Self, Subscription), ReservationError> {
		let subscription = feed.subscribe(SubscriptionFilter::for_user(actor.id.clone()));
		let since = feed.last_sequence();
		let projection = Self::load(queries, notifier, actor, since)?;
		Ok((projection, subscription))
	}

	/// Start from the user's current dashboard rows
	///
	/// `since` must be read from the feed after subscribing and before this
	/// call; events up to it are treated as already loaded.
	pub fn load(
		queries: &DashboardQueries,
		notifier: &ChangeNotifier,
		actor: &Actor,
		since: SequenceNumber,
	) -> Result<Self, ReservationError> {
		let mut projection = Self::empty(actor.id.clone());
		projection.baseline = since;
		projection.last_seq = since;

		match actor.role {
			Role::Donor => {
				for listing in queries.donor_listings(&actor.id)? {
					projection.listings.insert(listing.id.clone(), listing);
				}
				for reservation in queries.list_active_reservations_for_donor(&actor.id)? {
					projection
						.reservations
						.insert(reservation.id.clone(), reservation);
				}
			}
			Role::Recipient => {
				for details in queries.list_reservations_for_recipient(&actor.id)? {
					projection
						.reservations
						.insert(details.reservation.id.clone(), details.reservation);
				}
			}
		}

		for notification in notifier.notifications(&actor.id)? {
			projection
				.notifications
				.insert(notification.id.clone(), notification);
		}

		Ok(projection)
	}

	pub fn empty(user_id: UserId) -> Self {
		Self {
			user_id,
			listings: HashMap::new(),
			reservations: HashMap::new(),
			notifications: HashMap::new(),
			versions: HashMap::new(),
			baseline: 0,
			last_seq: 0,
		}
	}

	/// Patch the projection with one event; returns whether anything changed
	pub fn apply(&mut self, event: &ChangeEvent) -> bool {
		if !event.is_visible_to(&self.user_id) {
			return false;
		}

		let key = (event.table(), event.row.id().to_string());
		let held = self.versions.get(&key).copied().unwrap_or(self.baseline);
		if event.seq <= held {
			debug!(
				target: "feed",
				user_id = %self.user_id,
				seq = event.seq,
				held,
				row_id = event.row.id(),
				"Stale change event ignored"
			);
			return false;
		}

		match (&event.row, event.kind) {
			(ChangeRow::Listing(listing), ChangeKind::Delete) => {
				self.listings.remove(&listing.id);
			}
			(ChangeRow::Listing(listing), _) => {
				self.listings.insert(listing.id.clone(), listing.clone());
			}
			(ChangeRow::Reservation(reservation), ChangeKind::Delete) => {
				self.reservations.remove(&reservation.id);
			}
			(ChangeRow::Reservation(reservation), _) => {
				self.reservations
					.insert(reservation.id.clone(), reservation.clone());
			}
			(ChangeRow::Notification(notification), ChangeKind::Delete) => {
				self.notifications.remove(&notification.id);
			}
			(ChangeRow::Notification(notification), _) => {
				self.notifications
					.insert(notification.id.clone(), notification.clone());
			}
		}

		self.versions.insert(key, event.seq);
		self.last_seq = self.last_seq.max(event.seq);
		true
	}

	/// Apply every event queued on the subscription; returns how many changed
	/// the projection
	pub fn sync(&mut self, subscription: &Subscription) -> usize {
		subscription
			.drain()
			.iter()
			.filter(|event| self.apply(event))
			.count()
	}

	pub fn last_seq(&self) -> SequenceNumber {
		self.last_seq
	}

	pub fn listing(&self, id: &str) -> Option<&Listing> {
		self.listings.get(id)
	}

	pub fn reservation(&self, id: &str) -> Option<&Reservation> {
		self.reservations.get(id)
	}

	/// Listings newest first
	pub fn listings(&self) -> Vec<&Listing> {
		let mut listings: Vec<_> = self.listings.values().collect();
		listings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
		listings
	}

	/// Reservations newest first
	pub fn reservations(&self) -> Vec<&Reservation> {
		let mut reservations: Vec<_> = self.reservations.values().collect();
		reservations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
		reservations
	}

	/// Pending requests, oldest first
	pub fn pending_queue(&self) -> Vec<&Reservation> {
		let mut queue: Vec<_> = self
			.reservations
			.values()
			.filter(|r| r.status == ReservationStatus::Pending)
			.collect();
		queue.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
		queue
	}

	/// Notifications newest first
	pub fn notifications(&self) -> Vec<&Notification> {
		let mut notifications: Vec<_> = self.notifications.values().collect();
		notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
		notifications
	}

	pub fn unread_count(&self) -> usize {
		self.notifications.values().filter(|n| !n.read).count()
	}
}

#[cfg(test)]
mod tests {
	use chrono::Utc;
	use saveplate_sdk::ListingStatus;

	use super::*;
	use crate::feed::RowFilter;

	fn create_test_reservation(status: ReservationStatus) -> Reservation {
		let now = Utc::now();
		Reservation {
			id: "r1".to_string(),
			food_listing_id: "l1".to_string(),
			recipient_id: "alice".to_string(),
			status,
			note: None,
			created_at: now,
			updated_at: now,
		}
	}

	fn create_test_listing(status: ListingStatus) -> Listing {
		let now = Utc::now();
		Listing {
			id: "l1".to_string(),
			donor_id: "donor_1".to_string(),
			title: "Bread".to_string(),
			description: None,
			quantity: "4 loaves".to_string(),
			category: "bakery".to_string(),
			location: "Main St".to_string(),
			pickup_instructions: None,
			status,
			expiration: now + chrono::TimeDelta::hours(1),
			pickup_time_start: None,
			pickup_time_end: None,
			allergens: Default::default(),
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn test_apply_skips_strangers_and_baseline() {
		let feed = ChangeFeed::new(16);
		let subscription = feed.subscribe(SubscriptionFilter::new(RowFilter::Any));

		// Committed before the projection loaded its rows
		feed.publish(
			ChangeKind::Insert,
			ChangeRow::Reservation(create_test_reservation(ReservationStatus::Pending)),
			None,
			vec!["alice".to_string(), "donor_1".to_string()],
		);
		let mut projection = DashboardProjection::empty("alice".to_string());
		projection.baseline = feed.last_sequence();
		projection.last_seq = projection.baseline;

		feed.publish(
			ChangeKind::Update,
			ChangeRow::Reservation(create_test_reservation(ReservationStatus::Expired)),
			Some("pending"),
			vec!["alice".to_string(), "donor_1".to_string()],
		);
		feed.publish(
			ChangeKind::Insert,
			ChangeRow::Reservation(Reservation {
				id: "r2".to_string(),
				recipient_id: "bob".to_string(),
				..create_test_reservation(ReservationStatus::Pending)
			}),
			None,
			vec!["bob".to_string(), "donor_1".to_string()],
		);

		assert_eq!(projection.sync(&subscription), 1);
		assert_eq!(
			projection.reservation("r1").unwrap().status,
			ReservationStatus::Expired
		);
		assert!(projection.reservation("r2").is_none());
		assert!(projection.pending_queue().is_empty());
		assert_eq!(projection.last_seq(), 2);
	}

	#[test]
	fn test_apply_follows_rolled_back_listing() {
		let feed = ChangeFeed::new(16);
		let subscription = feed.subscribe(SubscriptionFilter::for_user("donor_1"));
		let mut projection = DashboardProjection::empty("donor_1".to_string());

		let audience = vec!["donor_1".to_string()];
		feed.publish(
			ChangeKind::Insert,
			ChangeRow::Listing(create_test_listing(ListingStatus::Available)),
			None,
			audience.clone(),
		);
		feed.publish(
			ChangeKind::Update,
			ChangeRow::Listing(create_test_listing(ListingStatus::Reserved)),
			Some("available"),
			audience.clone(),
		);
		feed.publish(
			ChangeKind::Update,
			ChangeRow::Listing(create_test_listing(ListingStatus::Available)),
			Some("reserved"),
			audience,
		);

		let events = subscription.drain();
		assert_eq!(events.len(), 3);
		for event in &events {
			assert!(projection.apply(event));
		}
		assert_eq!(
			projection.listing("l1").unwrap().status,
			ListingStatus::Available
		);

		// Redelivery of an older version is ignored
		assert!(!projection.apply(&events[1]));
		assert_eq!(
			projection.listing("l1").unwrap().status,
			ListingStatus::Available
		);
		assert_eq!(projection.last_seq(), 3);
	}
}
