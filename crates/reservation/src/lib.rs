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

//! SavePlate Reservation Engine
//!
//! This crate owns the lifecycle of surplus-food listings and the
//! reservations recipients make against them. It enforces the state
//! machines of both entities, settles races between concurrent requests,
//! expires stale listings in the background, and fans every change out to
//! the dashboards that display it.
//!
//! Architecture:
//! - Collaborator traits over an external relational store; conditional
//!   updates and a unique index are the only concurrency primitives
//! - Orchestrator as the single authority for user-driven transitions
//! - Expiration sweeper on its own thread, using the same conditional writes
//! - Best-effort notifications; state transitions are authoritative
//! - Change feed with per-user scoping for real-time dashboards

pub mod config;
pub mod error;
pub mod feed;
pub mod lifecycle;
pub mod logging;
pub mod notifier;
pub mod orchestrator;
pub mod projection;
pub mod queries;
pub mod store;
pub mod sweeper;

pub use config::ReservationConfig;
pub use error::ReservationError;
pub use feed::{
	ChangeEvent, ChangeFeed, ChangeKind, ChangeRow, FeedListener, RowFilter, Subscription,
	SubscriptionFilter, Table,
};
pub use notifier::ChangeNotifier;
pub use orchestrator::ReservationOrchestrator;
pub use projection::DashboardProjection;
pub use queries::DashboardQueries;
pub use store::{MemoryStore, StoreError, Stores};
pub use sweeper::{ExpirationSweeper, SweepReport, SweeperHandle};
