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

//! Addressed notifications
//!
//! Every transition that affects a user who did not initiate it produces
//! exactly one notification row for that user. Writes are best-effort: a
//! failure is logged and swallowed and never unwinds the transition that
//! triggered it. Real-time delivery of the row itself happens through the
//! change feed when the store commits it.

use std::sync::Arc;

use chrono::Utc;
use saveplate_sdk::{Listing, Notification, NotificationKind, Reservation, UserId};
use tracing::{debug, warn};

use crate::{
	error::ReservationError,
	store::{NotificationStore, new_row_id},
};

pub struct ChangeNotifier {
	notifications: Arc<dyn NotificationStore>,
	page_size: usize,
}

impl ChangeNotifier {
	pub fn new(notifications: Arc<dyn NotificationStore>, page_size: usize) -> Self {
		Self {
			notifications,
			page_size: page_size.max(1),
		}
	}

	/// Tell the donor a recipient asked for their listing
	pub fn request_received(
		&self,
		listing: &Listing,
		reservation: &Reservation,
	) -> Option<Notification> {
		self.send(
			&listing.donor_id,
			NotificationKind::FoodRequested,
			"New food request",
			format!(
				"Someone requested \"{}\". Review the request on your dashboard.",
				listing.title
			),
			listing,
			Some(reservation),
		)
	}

	pub fn request_confirmed(
		&self,
		listing: &Listing,
		reservation: &Reservation,
	) -> Option<Notification> {
		self.send(
			&reservation.recipient_id,
			NotificationKind::RequestConfirmed,
			"Reservation confirmed",
			format!(
				"Your request for \"{}\" was confirmed. You can proceed with pickup.",
				listing.title
			),
			listing,
			Some(reservation),
		)
	}

	pub fn request_declined(
		&self,
		listing: &Listing,
		reservation: &Reservation,
	) -> Option<Notification> {
		self.send(
			&reservation.recipient_id,
			NotificationKind::RequestDeclined,
			"Reservation declined",
			format!("The donor declined your request for \"{}\".", listing.title),
			listing,
			Some(reservation),
		)
	}

	/// Tell a recipient their request lost to a sibling that was confirmed
	pub fn request_unavailable(
		&self,
		listing: &Listing,
		reservation: &Reservation,
	) -> Option<Notification> {
		self.send(
			&reservation.recipient_id,
			NotificationKind::RequestUnavailable,
			"Item no longer available",
			format!(
				"\"{}\" was reserved by another recipient. Your request has been closed.",
				listing.title
			),
			listing,
			Some(reservation),
		)
	}

	pub fn pickup_completed(
		&self,
		listing: &Listing,
		reservation: &Reservation,
	) -> Option<Notification> {
		self.send(
			&reservation.recipient_id,
			NotificationKind::PickupCompleted,
			"Pickup completed",
			format!(
				"The donor marked the pickup of \"{}\" as completed. Thank you!",
				listing.title
			),
			listing,
			Some(reservation),
		)
	}

	pub fn listing_expired_for_donor(&self, listing: &Listing) -> Option<Notification> {
		self.send(
			&listing.donor_id,
			NotificationKind::ListingExpired,
			"Listing expired",
			format!("\"{}\" expired before anyone reserved it.", listing.title),
			listing,
			None,
		)
	}

	pub fn listing_expired_for_recipient(
		&self,
		listing: &Listing,
		reservation: &Reservation,
	) -> Option<Notification> {
		self.send(
			&reservation.recipient_id,
			NotificationKind::ListingExpired,
			"Listing expired",
			format!(
				"\"{}\" expired before your request was confirmed.",
				listing.title
			),
			listing,
			Some(reservation),
		)
	}

	fn send(
		&self,
		user_id: &UserId,
		kind: NotificationKind,
		title: &str,
		message: String,
		listing: &Listing,
		reservation: Option<&Reservation>,
	) -> Option<Notification> {
		let notification = Notification {
			id: new_row_id(),
			user_id: user_id.clone(),
			title: title.to_string(),
			message,
			kind,
			read: false,
			food_listing_id: Some(listing.id.clone()),
			reservation_id: reservation.map(|r| r.id.clone()),
			created_at: Utc::now(),
		};

		match self.notifications.insert_notification(notification) {
			Ok(stored) => {
				debug!(
					target: "notifier",
					user_id = %stored.user_id,
					kind = kind.as_str(),
					listing_id = %listing.id,
					"Notification stored"
				);
				Some(stored)
			}
			Err(e) => {
				warn!(
					target: "notifier",
					user_id = %user_id,
					kind = kind.as_str(),
					listing_id = %listing.id,
					error = %e,
					"Failed to store notification"
				);
				None
			}
		}
	}

	/// A user's most recent notifications, newest first
	pub fn notifications(&self, user_id: &str) -> Result<Vec<Notification>, ReservationError> {
		Ok(self
			.notifications
			.notifications_for_user(user_id, self.page_size)?)
	}

	/// Unread notifications within the most recent page
	pub fn unread_count(&self, user_id: &str) -> Result<usize, ReservationError> {
		Ok(self
			.notifications(user_id)?
			.iter()
			.filter(|n| !n.read)
			.count())
	}

	pub fn mark_read(&self, user_id: &str, id: &str) -> Result<Notification, ReservationError> {
		self.owned(user_id, id)?;
		self.notifications
			.mark_read(id)?
			.ok_or_else(|| ReservationError::NotFound(format!("notification {}", id)))
	}

	pub fn mark_all_read(&self, user_id: &str) -> Result<usize, ReservationError> {
		Ok(self.notifications.mark_all_read(user_id)?)
	}

	pub fn delete_notification(&self, user_id: &str, id: &str) -> Result<(), ReservationError> {
		self.owned(user_id, id)?;
		self.notifications.delete_notification(id)?;
		Ok(())
	}

	fn owned(&self, user_id: &str, id: &str) -> Result<Notification, ReservationError> {
		let notification = self
			.notifications
			.notification(id)?
			.ok_or_else(|| ReservationError::NotFound(format!("notification {}", id)))?;
		if notification.user_id != user_id {
			return Err(ReservationError::Forbidden(
				"notification belongs to another user".to_string(),
			));
		}
		Ok(notification)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use chrono::Duration;
	use saveplate_sdk::{ListingStatus, ReservationStatus};

	use super::*;
	use crate::store::{MemoryStore, StoreError};

	struct FailingNotifications;

	impl NotificationStore for FailingNotifications {
		fn insert_notification(&self, _: Notification) -> Result<Notification, StoreError> {
			Err(StoreError::Unavailable("notifications offline".to_string()))
		}

		fn notification(&self, _: &str) -> Result<Option<Notification>, StoreError> {
			Err(StoreError::Unavailable("notifications offline".to_string()))
		}

		fn notifications_for_user(
			&self,
			_: &str,
			_: usize,
		) -> Result<Vec<Notification>, StoreError> {
			Err(StoreError::Unavailable("notifications offline".to_string()))
		}

		fn mark_read(&self, _: &str) -> Result<Option<Notification>, StoreError> {
			Err(StoreError::Unavailable("notifications offline".to_string()))
		}

		fn mark_all_read(&self, _: &str) -> Result<usize, StoreError> {
			Err(StoreError::Unavailable("notifications offline".to_string()))
		}

		fn delete_notification(&self, _: &str) -> Result<Option<Notification>, StoreError> {
			Err(StoreError::Unavailable("notifications offline".to_string()))
		}
	}

	fn create_test_pair() -> (Listing, Reservation) {
		let now = Utc::now();
		let listing = Listing {
			id: "listing_1".to_string(),
			donor_id: "donor_1".to_string(),
			title: "Apples".to_string(),
			description: None,
			quantity: "1 crate".to_string(),
			category: "produce".to_string(),
			location: "Market".to_string(),
			pickup_instructions: None,
			status: ListingStatus::Available,
			expiration: now + Duration::hours(2),
			pickup_time_start: None,
			pickup_time_end: None,
			allergens: BTreeSet::new(),
			created_at: now,
			updated_at: now,
		};
		let reservation = Reservation {
			id: "reservation_1".to_string(),
			food_listing_id: listing.id.clone(),
			recipient_id: "alice".to_string(),
			status: ReservationStatus::Pending,
			note: None,
			created_at: now,
			updated_at: now,
		};
		(listing, reservation)
	}

	#[test]
	fn test_notifications_are_addressed() {
		let store = Arc::new(MemoryStore::default());
		let notifier = ChangeNotifier::new(store.clone(), 50);
		let (listing, reservation) = create_test_pair();

		let to_donor = notifier.request_received(&listing, &reservation).unwrap();
		assert_eq!(to_donor.user_id, "donor_1");
		assert_eq!(to_donor.kind, NotificationKind::FoodRequested);
		assert_eq!(to_donor.reservation_id.as_deref(), Some("reservation_1"));

		let to_recipient = notifier.request_unavailable(&listing, &reservation).unwrap();
		assert_eq!(to_recipient.user_id, "alice");
		assert_eq!(to_recipient.kind, NotificationKind::RequestUnavailable);

		let expired = notifier.listing_expired_for_donor(&listing).unwrap();
		assert_eq!(expired.reservation_id, None);
		assert_eq!(notifier.unread_count("donor_1").unwrap(), 2);
	}

	#[test]
	fn test_failed_write_is_swallowed() {
		let notifier = ChangeNotifier::new(Arc::new(FailingNotifications), 50);
		let (listing, reservation) = create_test_pair();
		assert!(notifier.request_confirmed(&listing, &reservation).is_none());
		assert!(notifier.notifications("alice").unwrap_err().is_retryable());
	}

	#[test]
	fn test_management_checks_ownership() {
		let store = Arc::new(MemoryStore::default());
		let notifier = ChangeNotifier::new(store, 50);
		let (listing, reservation) = create_test_pair();
		let note = notifier.pickup_completed(&listing, &reservation).unwrap();

		assert!(matches!(
			notifier.mark_read("mallory", &note.id),
			Err(ReservationError::Forbidden(_))
		));
		assert!(matches!(
			notifier.mark_read("alice", "missing"),
			Err(ReservationError::NotFound(_))
		));

		assert!(notifier.mark_read("alice", &note.id).unwrap().read);
		assert_eq!(notifier.unread_count("alice").unwrap(), 0);

		assert!(matches!(
			notifier.delete_notification("mallory", &note.id),
			Err(ReservationError::Forbidden(_))
		));
		notifier.delete_notification("alice", &note.id).unwrap();
		assert!(notifier.notifications("alice").unwrap().is_empty());
	}

	#[test]
	fn test_page_size_limits_listing() {
		let store = Arc::new(MemoryStore::default());
		let notifier = ChangeNotifier::new(store, 2);
		let (listing, reservation) = create_test_pair();
		for _ in 0..3 {
			notifier.request_declined(&listing, &reservation);
		}
		assert_eq!(notifier.notifications("alice").unwrap().len(), 2);
		assert_eq!(notifier.mark_all_read("alice").unwrap(), 3);
	}
}
