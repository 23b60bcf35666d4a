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

//! Guards shared by every lifecycle transition
//!
//! These checks run before a conditional write is attempted. They reject
//! requests that can never succeed; the conditional write itself is still
//! what settles races.

use saveplate_sdk::{
	Actor, Listing, ListingStatus, NewListing, Reservation, ReservationStatus, Role, Timestamp,
	UserId,
};

use crate::{error::ReservationError, store::new_row_id};

pub fn ensure_role(actor: &Actor, role: Role, action: &str) -> Result<(), ReservationError> {
	if actor.role != role {
		return Err(ReservationError::Forbidden(format!(
			"only {} accounts can {}",
			role_name(role),
			action
		)));
	}
	Ok(())
}

pub fn ensure_listing_owner(listing: &Listing, actor: &Actor) -> Result<(), ReservationError> {
	if listing.donor_id != actor.id {
		return Err(ReservationError::Forbidden(format!(
			"listing {} belongs to another donor",
			listing.id
		)));
	}
	Ok(())
}

/// A recipient may only request a listing that is still open
pub fn ensure_requestable(listing: &Listing) -> Result<(), ReservationError> {
	if listing.status != ListingStatus::Available {
		return Err(ReservationError::Conflict(format!(
			"listing {} is {}",
			listing.id, listing.status
		)));
	}
	Ok(())
}

pub fn ensure_listing_transition(
	listing: &Listing,
	next: ListingStatus,
) -> Result<(), ReservationError> {
	if !listing.status.can_transition_to(next) {
		return Err(ReservationError::InvalidState(format!(
			"listing {} is {}, cannot become {}",
			listing.id, listing.status, next
		)));
	}
	Ok(())
}

pub fn ensure_reservation_transition(
	reservation: &Reservation,
	next: ReservationStatus,
) -> Result<(), ReservationError> {
	if !reservation.status.can_transition_to(next) {
		return Err(ReservationError::InvalidState(format!(
			"reservation {} is {}, cannot become {}",
			reservation.id, reservation.status, next
		)));
	}
	Ok(())
}

pub fn validate_new_listing(listing: &NewListing, now: Timestamp) -> Result<(), ReservationError> {
	if listing.title.trim().is_empty() {
		return Err(ReservationError::Validation("title is required".to_string()));
	}
	if listing.quantity.trim().is_empty() {
		return Err(ReservationError::Validation("quantity is required".to_string()));
	}
	if listing.expiration <= now {
		return Err(ReservationError::Validation(
			"expiration must be in the future".to_string(),
		));
	}
	if let (Some(start), Some(end)) = (listing.pickup_time_start, listing.pickup_time_end)
		&& start > end
	{
		return Err(ReservationError::Validation(
			"pickup window ends before it starts".to_string(),
		));
	}
	Ok(())
}

/// Build the stored row for a freshly posted listing
pub fn new_listing_record(donor_id: &str, listing: NewListing, now: Timestamp) -> Listing {
	Listing {
		id: new_row_id(),
		donor_id: donor_id.to_string(),
		title: listing.title.trim().to_string(),
		description: listing.description,
		quantity: listing.quantity.trim().to_string(),
		category: listing.category,
		location: listing.location,
		pickup_instructions: listing.pickup_instructions,
		status: ListingStatus::Available,
		expiration: listing.expiration,
		pickup_time_start: listing.pickup_time_start,
		pickup_time_end: listing.pickup_time_end,
		allergens: listing.allergens,
		created_at: now,
		updated_at: now,
	}
}

pub fn new_reservation(
	listing_id: &str,
	recipient_id: &UserId,
	note: Option<String>,
	now: Timestamp,
) -> Reservation {
	Reservation {
		id: new_row_id(),
		food_listing_id: listing_id.to_string(),
		recipient_id: recipient_id.clone(),
		status: ReservationStatus::Pending,
		note: note.filter(|n| !n.trim().is_empty()),
		created_at: now,
		updated_at: now,
	}
}

fn role_name(role: Role) -> &'static str {
	match role {
		Role::Donor => "donor",
		Role::Recipient => "recipient",
	}
}
