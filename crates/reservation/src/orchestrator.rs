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

//! Reservation orchestrator
//!
//! The only component allowed to move listings and reservations through
//! their state machines on behalf of users. Each operation is a short
//! sequence of store round trips; no lock is held across them. Races are
//! settled by the store's conditional updates and its unique index over
//! active `(listing, recipient)` pairs:
//!
//! - `create_reservation` relies on the unique index, then re-reads the
//!   listing so a request inserted while a confirmation was in flight is
//!   closed instead of lingering.
//! - `confirm_reservation` claims the listing with
//!   `available -> reserved`, expires the sibling requests, then confirms
//!   the chosen one. Only the winner of the listing update gets that far.
//! - Compensating writes undo the listing claim when a write that must
//!   follow it does not commit. Siblings already expired stay expired.

use std::sync::Arc;

use chrono::Utc;
use saveplate_sdk::{
	Actor, DonationRecord, Listing, ListingStatus, NewListing, Reservation, ReservationStatus,
	Role,
};
use tracing::{error, info, warn};

use crate::{
	error::ReservationError,
	lifecycle::{
		ensure_listing_owner, ensure_listing_transition, ensure_requestable,
		ensure_reservation_transition, ensure_role, new_listing_record, new_reservation,
		validate_new_listing,
	},
	notifier::ChangeNotifier,
	store::{Stores, new_row_id},
};

pub struct ReservationOrchestrator {
	stores: Stores,
	notifier: Arc<ChangeNotifier>,
}

impl ReservationOrchestrator {
	pub fn new(stores: Stores, notifier: Arc<ChangeNotifier>) -> Self {
		Self { stores, notifier }
	}

	pub fn notifier(&self) -> &Arc<ChangeNotifier> {
		&self.notifier
	}

	/// Resolve a session token to the acting user
	pub fn authenticate(&self, token: &str) -> Result<Actor, ReservationError> {
		self.stores
			.sessions
			.current_user(token)?
			.ok_or_else(|| ReservationError::Forbidden("session is not valid".to_string()))
	}

	/// Publish a new `available` listing for a donor
	pub fn post_listing(
		&self,
		actor: &Actor,
		listing: NewListing,
	) -> Result<Listing, ReservationError> {
		ensure_role(actor, Role::Donor, "post food")?;
		let now = Utc::now();
		validate_new_listing(&listing, now)?;

		let listing = self
			.stores
			.listings
			.insert_listing(new_listing_record(&actor.id, listing, now))?;

		info!(
			target: "orchestrator",
			listing_id = %listing.id,
			donor_id = %listing.donor_id,
			expiration = %listing.expiration,
			"Listing posted"
		);
		Ok(listing)
	}

	/// Request an available listing on behalf of a recipient
	///
	/// The listing stays `available`; several recipients may hold pending
	/// requests on it until the donor confirms one.
	pub fn create_reservation(
		&self,
		actor: &Actor,
		listing_id: &str,
		note: Option<String>,
	) -> Result<Reservation, ReservationError> {
		let listing = self.load_listing(listing_id)?;
		ensure_role(actor, Role::Recipient, "request food")?;
		ensure_requestable(&listing)?;

		let reservation = self
			.stores
			.reservations
			.insert_pending(new_reservation(&listing.id, &actor.id, note, Utc::now()))
			.map_err(|e| {
				warn!(
					target: "orchestrator",
					listing_id = %listing.id,
					recipient_id = %actor.id,
					error = %e,
					"Reservation insert rejected"
				);
				ReservationError::from(e)
			})?;

		// A confirmation may have claimed the listing after our first read
		let current = self.load_listing(listing_id)?;
		if current.status != ListingStatus::Available {
			self.stores.reservations.transition_reservation(
				&reservation.id,
				ReservationStatus::Pending,
				ReservationStatus::Expired,
				Utc::now(),
			)?;
			warn!(
				target: "orchestrator",
				listing_id = %current.id,
				reservation_id = %reservation.id,
				status = %current.status,
				"Listing changed while requesting, request closed"
			);
			return Err(ReservationError::Conflict(format!(
				"listing {} is {}",
				current.id, current.status
			)));
		}

		info!(
			target: "orchestrator",
			listing_id = %listing.id,
			reservation_id = %reservation.id,
			recipient_id = %actor.id,
			"Reservation requested"
		);
		self.notifier.request_received(&current, &reservation);

		Ok(reservation)
	}

	/// Approve one pending request, reserving the listing for its recipient
	///
	/// Every other pending request on the listing is expired and its
	/// recipient told the item is gone. A successful return implies no
	/// sibling is left pending.
	pub fn confirm_reservation(
		&self,
		actor: &Actor,
		reservation_id: &str,
	) -> Result<Reservation, ReservationError> {
		let reservation = self.load_reservation(reservation_id)?;
		let listing = self.load_listing(&reservation.food_listing_id)?;
		ensure_listing_owner(&listing, actor)?;
		ensure_reservation_transition(&reservation, ReservationStatus::Confirmed)?;
		ensure_listing_transition(&listing, ListingStatus::Reserved)?;

		let now = Utc::now();
		let reserved = self
			.stores
			.listings
			.transition_listing(&listing.id, ListingStatus::Available, ListingStatus::Reserved, now)?
			.ok_or_else(|| {
				warn!(
					target: "orchestrator",
					listing_id = %listing.id,
					reservation_id = %reservation.id,
					"Lost race to reserve listing"
				);
				ReservationError::InvalidState(format!(
					"listing {} is no longer available",
					listing.id
				))
			})?;

		let siblings = match self.expire_siblings(&reserved, &reservation.id) {
			Ok(siblings) => siblings.len(),
			Err(e) => {
				error!(
					target: "orchestrator",
					listing_id = %reserved.id,
					reservation_id = %reservation.id,
					error = %e,
					"Failed to expire sibling reservations"
				);
				self.undo_listing(&reserved, ListingStatus::Available);
				return Err(e);
			}
		};

		let confirmed = match self.stores.reservations.transition_reservation(
			&reservation.id,
			ReservationStatus::Pending,
			ReservationStatus::Confirmed,
			now,
		) {
			Ok(Some(confirmed)) => confirmed,
			Ok(None) => {
				self.undo_listing(&reserved, ListingStatus::Available);
				return Err(ReservationError::InvalidState(format!(
					"reservation {} is no longer pending",
					reservation.id
				)));
			}
			Err(e) => {
				self.undo_listing(&reserved, ListingStatus::Available);
				return Err(e.into());
			}
		};

		info!(
			target: "orchestrator",
			listing_id = %reserved.id,
			reservation_id = %confirmed.id,
			recipient_id = %confirmed.recipient_id,
			siblings_expired = siblings,
			"Reservation confirmed"
		);
		self.notifier.request_confirmed(&reserved, &confirmed);

		Ok(confirmed)
	}

	/// Expire every pending reservation on a reserved listing except `keep`
	///
	/// Each affected recipient is told the item went to someone else.
	pub fn expire_siblings(
		&self,
		listing: &Listing,
		keep: &str,
	) -> Result<Vec<Reservation>, ReservationError> {
		let expired =
			self.stores
				.reservations
				.expire_pending_for_listing(&listing.id, Some(keep), Utc::now())?;

		for sibling in &expired {
			self.notifier.request_unavailable(listing, sibling);
		}

		Ok(expired)
	}

	/// Turn down a pending request; the listing is left as it is
	pub fn decline_reservation(
		&self,
		actor: &Actor,
		reservation_id: &str,
	) -> Result<Reservation, ReservationError> {
		let reservation = self.load_reservation(reservation_id)?;
		let listing = self.load_listing(&reservation.food_listing_id)?;
		ensure_listing_owner(&listing, actor)?;
		ensure_reservation_transition(&reservation, ReservationStatus::Expired)?;

		let declined = self
			.stores
			.reservations
			.transition_reservation(
				&reservation.id,
				ReservationStatus::Pending,
				ReservationStatus::Expired,
				Utc::now(),
			)?
			.ok_or_else(|| {
				ReservationError::InvalidState(format!(
					"reservation {} is no longer pending",
					reservation.id
				))
			})?;

		info!(
			target: "orchestrator",
			listing_id = %listing.id,
			reservation_id = %declined.id,
			recipient_id = %declined.recipient_id,
			"Reservation declined"
		);
		self.notifier.request_declined(&listing, &declined);

		Ok(declined)
	}

	/// Record that the confirmed recipient collected the food
	pub fn complete_pickup(
		&self,
		actor: &Actor,
		listing_id: &str,
	) -> Result<Listing, ReservationError> {
		let listing = self.load_listing(listing_id)?;
		ensure_listing_owner(&listing, actor)?;
		ensure_listing_transition(&listing, ListingStatus::Completed)?;

		let confirmed = self
			.stores
			.reservations
			.reservations_for_listing(&listing.id)?
			.into_iter()
			.find(|r| r.status == ReservationStatus::Confirmed)
			.ok_or_else(|| {
				ReservationError::InvalidState(format!(
					"listing {} has no confirmed reservation",
					listing.id
				))
			})?;

		let now = Utc::now();
		let completed = self
			.stores
			.listings
			.transition_listing(&listing.id, ListingStatus::Reserved, ListingStatus::Completed, now)?
			.ok_or_else(|| {
				ReservationError::InvalidState(format!("listing {} is no longer reserved", listing.id))
			})?;

		let picked_up = match self.stores.reservations.transition_reservation(
			&confirmed.id,
			ReservationStatus::Confirmed,
			ReservationStatus::Completed,
			now,
		) {
			Ok(Some(picked_up)) => picked_up,
			Ok(None) => {
				self.undo_listing(&completed, ListingStatus::Reserved);
				return Err(ReservationError::InvalidState(format!(
					"reservation {} is no longer confirmed",
					confirmed.id
				)));
			}
			Err(e) => {
				self.undo_listing(&completed, ListingStatus::Reserved);
				return Err(e.into());
			}
		};

		self.record_donation(&completed, &picked_up);

		info!(
			target: "orchestrator",
			listing_id = %completed.id,
			reservation_id = %picked_up.id,
			recipient_id = %picked_up.recipient_id,
			"Pickup completed"
		);
		self.notifier.pickup_completed(&completed, &picked_up);

		Ok(completed)
	}

	fn record_donation(&self, listing: &Listing, reservation: &Reservation) {
		let record = DonationRecord {
			id: new_row_id(),
			donor_id: listing.donor_id.clone(),
			food_listing_id: listing.id.clone(),
			recipient_id: Some(reservation.recipient_id.clone()),
			donated_at: listing.created_at,
			pickup_completed_at: Some(reservation.updated_at),
		};

		if let Err(e) = self.stores.donations.record_donation(record) {
			warn!(
				target: "orchestrator",
				listing_id = %listing.id,
				error = %e,
				"Failed to record donation history"
			);
		}
	}

	/// Roll a listing back after the reservation write that had to follow failed
	fn undo_listing(&self, listing: &Listing, back_to: ListingStatus) {
		match self.stores.listings.transition_listing(
			&listing.id,
			listing.status,
			back_to,
			Utc::now(),
		) {
			Ok(Some(_)) => {
				warn!(
					target: "orchestrator",
					listing_id = %listing.id,
					from = %listing.status,
					to = %back_to,
					"Listing transition rolled back"
				);
			}
			Ok(None) => {
				error!(
					target: "orchestrator",
					listing_id = %listing.id,
					"Listing changed before rollback"
				);
			}
			Err(e) => {
				error!(
					target: "orchestrator",
					listing_id = %listing.id,
					error = %e,
					"Listing rollback failed"
				);
			}
		}
	}

	fn load_listing(&self, id: &str) -> Result<Listing, ReservationError> {
		self.stores
			.listings
			.listing(id)?
			.ok_or_else(|| ReservationError::NotFound(format!("listing {}", id)))
	}

	fn load_reservation(&self, id: &str) -> Result<Reservation, ReservationError> {
		self.stores
			.reservations
			.reservation(id)?
			.ok_or_else(|| ReservationError::NotFound(format!("reservation {}", id)))
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use chrono::Duration;
	use saveplate_sdk::Profile;

	use super::*;
	use crate::store::{MemoryStore, ProfileStore, ReservationStore};

	fn setup() -> (Arc<MemoryStore>, ReservationOrchestrator) {
		let store = Arc::new(MemoryStore::default());
		let stores = Stores::from_memory(store.clone());
		let notifier = Arc::new(ChangeNotifier::new(stores.notifications.clone(), 50));
		(store, ReservationOrchestrator::new(stores, notifier))
	}

	fn create_test_new_listing() -> NewListing {
		NewListing {
			title: "Rice".to_string(),
			description: None,
			quantity: "5 kg".to_string(),
			category: "pantry".to_string(),
			location: "Depot".to_string(),
			pickup_instructions: None,
			expiration: Utc::now() + Duration::hours(1),
			pickup_time_start: None,
			pickup_time_end: None,
			allergens: BTreeSet::new(),
		}
	}

	#[test]
	fn test_recipient_cannot_post_listing() {
		let (_, orchestrator) = setup();
		let result = orchestrator.post_listing(&Actor::recipient("r1"), create_test_new_listing());
		assert!(matches!(result, Err(ReservationError::Forbidden(_))));
	}

	#[test]
	fn test_create_reservation_errors() {
		let (_, orchestrator) = setup();
		let donor = Actor::donor("d1");
		let listing = orchestrator
			.post_listing(&donor, create_test_new_listing())
			.unwrap();

		assert!(matches!(
			orchestrator.create_reservation(&Actor::recipient("r1"), "missing", None),
			Err(ReservationError::NotFound(_))
		));
		assert!(matches!(
			orchestrator.create_reservation(&donor, &listing.id, None),
			Err(ReservationError::Forbidden(_))
		));

		orchestrator
			.create_reservation(&Actor::recipient("r1"), &listing.id, None)
			.unwrap();
		assert!(matches!(
			orchestrator.create_reservation(&Actor::recipient("r1"), &listing.id, None),
			Err(ReservationError::Conflict(_))
		));
	}

	#[test]
	fn test_expire_siblings_keeps_winner() {
		let (store, orchestrator) = setup();
		let listing = orchestrator
			.post_listing(&Actor::donor("d1"), create_test_new_listing())
			.unwrap();
		let winner = orchestrator
			.create_reservation(&Actor::recipient("r1"), &listing.id, None)
			.unwrap();
		let loser = orchestrator
			.create_reservation(&Actor::recipient("r2"), &listing.id, None)
			.unwrap();

		let expired = orchestrator.expire_siblings(&listing, &winner.id).unwrap();
		assert_eq!(expired.len(), 1);
		assert_eq!(expired[0].id, loser.id);

		assert_eq!(
			store.reservation(&winner.id).unwrap().unwrap().status,
			ReservationStatus::Pending
		);
		assert_eq!(orchestrator.notifier().unread_count("r2").unwrap(), 1);
	}

	#[test]
	fn test_only_owner_confirms() {
		let (_, orchestrator) = setup();
		let listing = orchestrator
			.post_listing(&Actor::donor("d1"), create_test_new_listing())
			.unwrap();
		let reservation = orchestrator
			.create_reservation(&Actor::recipient("r1"), &listing.id, None)
			.unwrap();

		assert!(matches!(
			orchestrator.confirm_reservation(&Actor::donor("d2"), &reservation.id),
			Err(ReservationError::Forbidden(_))
		));
		assert!(matches!(
			orchestrator.decline_reservation(&Actor::donor("d2"), &reservation.id),
			Err(ReservationError::Forbidden(_))
		));
		assert!(matches!(
			orchestrator.confirm_reservation(&Actor::donor("d1"), "missing"),
			Err(ReservationError::NotFound(_))
		));
	}

	#[test]
	fn test_authenticate_unknown_session() {
		let (store, orchestrator) = setup();
		assert!(matches!(
			orchestrator.authenticate("nope"),
			Err(ReservationError::Forbidden(_))
		));

		store
			.insert_profile(Profile {
				id: "d1".to_string(),
				role: Role::Donor,
				first_name: "Dana".to_string(),
				last_name: "Lee".to_string(),
			})
			.unwrap();
		let token = store.open_session("d1");
		assert_eq!(orchestrator.authenticate(&token).unwrap(), Actor::donor("d1"));
	}
}
