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

//! Read side consumed by the donor and recipient dashboards

use std::collections::HashMap;

use saveplate_sdk::{
	DonationRecord, DonorStats, DonorSummary, Listing, ListingId, ListingStatus, ListingSummary,
	RecipientStats, Reservation, ReservationDetails, ReservationStatus, UserId,
};

use crate::{error::ReservationError, store::Stores};

pub struct DashboardQueries {
	stores: Stores,
}

impl DashboardQueries {
	pub fn new(stores: Stores) -> Self {
		Self { stores }
	}

	/// The donor's approval queue
	///
	/// Pending requests come first, then confirmed ones awaiting pickup.
	/// Each group is ordered oldest first so requests are reviewed in the
	/// order they arrived.
	pub fn list_active_reservations_for_donor(
		&self,
		donor_id: &str,
	) -> Result<Vec<Reservation>, ReservationError> {
		let listing_ids: Vec<ListingId> = self
			.stores
			.listings
			.listings_for_donor(donor_id)?
			.into_iter()
			.map(|l| l.id)
			.collect();
		if listing_ids.is_empty() {
			return Ok(Vec::new());
		}

		let (pending, rest): (Vec<_>, Vec<_>) = self
			.stores
			.reservations
			.reservations_for_listings(&listing_ids)?
			.into_iter()
			.partition(|r| r.status == ReservationStatus::Pending);

		let mut queue = pending;
		queue.extend(
			rest.into_iter()
				.filter(|r| r.status == ReservationStatus::Confirmed),
		);
		Ok(queue)
	}

	/// Every reservation the recipient made, newest first, joined with the
	/// listing and the donor's name
	pub fn list_reservations_for_recipient(
		&self,
		recipient_id: &str,
	) -> Result<Vec<ReservationDetails>, ReservationError> {
		let mut reservations = self
			.stores
			.reservations
			.reservations_for_recipient(recipient_id)?;
		reservations.reverse();

		let mut listings: HashMap<ListingId, Option<Listing>> = HashMap::new();
		let mut donors: HashMap<UserId, Option<DonorSummary>> = HashMap::new();
		let mut details = Vec::with_capacity(reservations.len());

		for reservation in reservations {
			if !listings.contains_key(&reservation.food_listing_id) {
				let listing = self.stores.listings.listing(&reservation.food_listing_id)?;
				listings.insert(reservation.food_listing_id.clone(), listing);
			}
			let listing = listings
				.get(&reservation.food_listing_id)
				.and_then(Option::as_ref);

			let donor = match listing {
				Some(listing) => {
					if !donors.contains_key(&listing.donor_id) {
						let summary = self.stores.profiles.profile(&listing.donor_id)?.map(|p| {
							DonorSummary {
								first_name: p.first_name,
								last_name: p.last_name,
							}
						});
						donors.insert(listing.donor_id.clone(), summary);
					}
					donors.get(&listing.donor_id).cloned().flatten()
				}
				None => None,
			};

			details.push(ReservationDetails {
				food_listing: listing.map(ListingSummary::from),
				donor,
				reservation,
			});
		}

		Ok(details)
	}

	/// The donor's listings, newest first
	pub fn donor_listings(&self, donor_id: &str) -> Result<Vec<Listing>, ReservationError> {
		Ok(self.stores.listings.listings_for_donor(donor_id)?)
	}

	pub fn donor_stats(&self, donor_id: &str) -> Result<DonorStats, ReservationError> {
		let mut stats = DonorStats::default();
		for listing in self.stores.listings.listings_for_donor(donor_id)? {
			match listing.status {
				ListingStatus::Available => stats.available += 1,
				ListingStatus::Reserved => stats.reserved += 1,
				ListingStatus::Completed => stats.completed += 1,
				ListingStatus::Expired => stats.expired += 1,
			}
		}
		Ok(stats)
	}

	pub fn recipient_stats(&self, recipient_id: &str) -> Result<RecipientStats, ReservationError> {
		let mut stats = RecipientStats::default();
		for reservation in self
			.stores
			.reservations
			.reservations_for_recipient(recipient_id)?
		{
			match reservation.status {
				ReservationStatus::Pending => stats.pending += 1,
				ReservationStatus::Confirmed => stats.confirmed += 1,
				ReservationStatus::Completed => stats.completed += 1,
				ReservationStatus::Expired => stats.expired += 1,
			}
		}
		Ok(stats)
	}

	pub fn donation_history(
		&self,
		donor_id: &str,
	) -> Result<Vec<DonationRecord>, ReservationError> {
		Ok(self.stores.donations.donations_for_donor(donor_id)?)
	}
}
