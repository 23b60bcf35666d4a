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

use thiserror::Error;

use crate::store::StoreError;

/// Error types for reservation lifecycle operations
///
/// `NotFound`, `Forbidden`, `Conflict`, `InvalidState` and `Validation` are
/// terminal: retrying the same call cannot change the outcome. Only
/// `Transient` may be retried, and only by the caller.
#[derive(Debug, Error)]
pub enum ReservationError {
	#[error("{0} not found")]
	NotFound(String),
	#[error("Forbidden: {0}")]
	Forbidden(String),
	#[error("Conflict: {0}")]
	Conflict(String),
	#[error("Invalid state: {0}")]
	InvalidState(String),
	#[error("Invalid input: {0}")]
	Validation(String),
	#[error("Transient failure: {0}")]
	Transient(#[source] StoreError),
}

impl ReservationError {
	pub fn is_retryable(&self) -> bool {
		matches!(self, ReservationError::Transient(_))
	}

	/// Message suitable for showing to the end user
	pub fn user_message(&self) -> String {
		match self {
			ReservationError::NotFound(what) => format!("The requested {} no longer exists.", what),
			ReservationError::Forbidden(reason) => format!("Action not allowed: {}.", reason),
			ReservationError::Conflict(reason) => format!("Request not possible: {}.", reason),
			ReservationError::InvalidState(reason) => {
				format!("This item has changed in the meantime: {}.", reason)
			}
			ReservationError::Validation(reason) => format!("Please check your input: {}.", reason),
			ReservationError::Transient(_) => {
				"Something went wrong. Please try again.".to_string()
			}
		}
	}
}

impl From<StoreError> for ReservationError {
	fn from(err: StoreError) -> Self {
		match err {
			StoreError::UniqueViolation(what) => ReservationError::Conflict(what),
			other => ReservationError::Transient(other),
		}
	}
}
