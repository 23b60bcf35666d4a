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

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type ListingId = String;
pub type ReservationId = String;
pub type NotificationId = String;
pub type Timestamp = DateTime<Utc>;

/// Account type chosen at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	Donor,
	Recipient,
}

/// Authenticated caller of an engine operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
	pub id: UserId,
	pub role: Role,
}

impl Actor {
	pub fn donor(id: impl Into<UserId>) -> Self {
		Self {
			id: id.into(),
			role: Role::Donor,
		}
	}

	pub fn recipient(id: impl Into<UserId>) -> Self {
		Self {
			id: id.into(),
			role: Role::Recipient,
		}
	}
}

/// Public profile fields denormalized into dashboard rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
	pub id: UserId,
	#[serde(rename = "user_type")]
	pub role: Role,
	pub first_name: String,
	pub last_name: String,
}

/// Listing availability status
///
/// ```text
/// available -> reserved -> completed
///     |           |
///     +-----------+--> expired
/// ```
///
/// `completed` and `expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
	Available,
	Reserved,
	Completed,
	Expired,
}

impl ListingStatus {
	pub const ALL: [ListingStatus; 4] = [
		ListingStatus::Available,
		ListingStatus::Reserved,
		ListingStatus::Completed,
		ListingStatus::Expired,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			ListingStatus::Available => "available",
			ListingStatus::Reserved => "reserved",
			ListingStatus::Completed => "completed",
			ListingStatus::Expired => "expired",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, ListingStatus::Completed | ListingStatus::Expired)
	}

	/// Whether `next` is a legal forward transition from this status
	pub fn can_transition_to(&self, next: ListingStatus) -> bool {
		matches!(
			(self, next),
			(ListingStatus::Available, ListingStatus::Reserved)
				| (ListingStatus::Reserved, ListingStatus::Completed)
				| (ListingStatus::Available, ListingStatus::Expired)
				| (ListingStatus::Reserved, ListingStatus::Expired)
		)
	}
}

impl std::fmt::Display for ListingStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Reservation approval status
///
/// ```text
/// pending -> confirmed -> completed
///    |           |
///    +-----------+--> expired
/// ```
///
/// `completed` and `expired` are terminal. A declined request is recorded
/// as `expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
	Pending,
	Confirmed,
	Completed,
	Expired,
}

impl ReservationStatus {
	pub const ALL: [ReservationStatus; 4] = [
		ReservationStatus::Pending,
		ReservationStatus::Confirmed,
		ReservationStatus::Completed,
		ReservationStatus::Expired,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			ReservationStatus::Pending => "pending",
			ReservationStatus::Confirmed => "confirmed",
			ReservationStatus::Completed => "completed",
			ReservationStatus::Expired => "expired",
		}
	}

	/// Pending or confirmed
	pub fn is_active(&self) -> bool {
		matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
	}

	pub fn is_terminal(&self) -> bool {
		!self.is_active()
	}

	pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
		matches!(
			(self, next),
			(ReservationStatus::Pending, ReservationStatus::Confirmed)
				| (ReservationStatus::Pending, ReservationStatus::Expired)
				| (ReservationStatus::Confirmed, ReservationStatus::Completed)
				| (ReservationStatus::Confirmed, ReservationStatus::Expired)
		)
	}
}

impl std::fmt::Display for ReservationStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A posted surplus-food item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
	pub id: ListingId,
	pub donor_id: UserId,
	pub title: String,
	pub description: Option<String>,
	pub quantity: String,
	pub category: String,
	pub location: String,
	pub pickup_instructions: Option<String>,
	pub status: ListingStatus,
	/// The sweeper expires `available` listings once this passes
	pub expiration: Timestamp,
	pub pickup_time_start: Option<Timestamp>,
	pub pickup_time_end: Option<Timestamp>,
	pub allergens: BTreeSet<String>,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

/// Donor-supplied fields for a new listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewListing {
	pub title: String,
	pub description: Option<String>,
	pub quantity: String,
	pub category: String,
	pub location: String,
	pub pickup_instructions: Option<String>,
	pub expiration: Timestamp,
	pub pickup_time_start: Option<Timestamp>,
	pub pickup_time_end: Option<Timestamp>,
	#[serde(default)]
	pub allergens: BTreeSet<String>,
}

/// A recipient's claim against a listing, subject to donor approval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
	pub id: ReservationId,
	pub food_listing_id: ListingId,
	pub recipient_id: UserId,
	pub status: ReservationStatus,
	pub note: Option<String>,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

/// Transition tag persisted as a notification's `type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
	/// A recipient requested one of the donor's listings
	FoodRequested,
	RequestConfirmed,
	RequestDeclined,
	/// Another request on the same listing was confirmed first
	RequestUnavailable,
	PickupCompleted,
	ListingExpired,
}

impl NotificationKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			NotificationKind::FoodRequested => "food_requested",
			NotificationKind::RequestConfirmed => "request_confirmed",
			NotificationKind::RequestDeclined => "request_declined",
			NotificationKind::RequestUnavailable => "request_unavailable",
			NotificationKind::PickupCompleted => "pickup_completed",
			NotificationKind::ListingExpired => "listing_expired",
		}
	}
}

/// A message addressed to one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
	pub id: NotificationId,
	pub user_id: UserId,
	pub title: String,
	pub message: String,
	#[serde(rename = "type")]
	pub kind: NotificationKind,
	pub read: bool,
	pub food_listing_id: Option<ListingId>,
	pub reservation_id: Option<ReservationId>,
	pub created_at: Timestamp,
}

/// Donation history entry written when a pickup completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationRecord {
	pub id: String,
	pub donor_id: UserId,
	pub food_listing_id: ListingId,
	pub recipient_id: Option<UserId>,
	pub donated_at: Timestamp,
	pub pickup_completed_at: Option<Timestamp>,
}

/// Listing fields shown next to a reservation on the recipient dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSummary {
	pub id: ListingId,
	pub title: String,
	pub quantity: String,
	pub location: String,
	pub category: String,
	pub status: ListingStatus,
	pub pickup_instructions: Option<String>,
	pub pickup_time_start: Option<Timestamp>,
	pub pickup_time_end: Option<Timestamp>,
}

impl From<&Listing> for ListingSummary {
	fn from(listing: &Listing) -> Self {
		Self {
			id: listing.id.clone(),
			title: listing.title.clone(),
			quantity: listing.quantity.clone(),
			location: listing.location.clone(),
			category: listing.category.clone(),
			status: listing.status,
			pickup_instructions: listing.pickup_instructions.clone(),
			pickup_time_start: listing.pickup_time_start,
			pickup_time_end: listing.pickup_time_end,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorSummary {
	pub first_name: String,
	pub last_name: String,
}

/// Reservation joined with its listing and the listing's donor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationDetails {
	#[serde(flatten)]
	pub reservation: Reservation,
	pub food_listing: Option<ListingSummary>,
	pub donor: Option<DonorSummary>,
}

/// Donor dashboard counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorStats {
	pub available: usize,
	pub reserved: usize,
	pub completed: usize,
	pub expired: usize,
}

/// Recipient dashboard counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientStats {
	pub pending: usize,
	pub confirmed: usize,
	pub completed: usize,
	pub expired: usize,
}
