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

//! Real-time change feed
//!
//! Every committed write to the store publishes one [`ChangeEvent`]. Dashboards
//! subscribe with a [`SubscriptionFilter`] and receive only the rows they are
//! entitled to see. Events for one row are published while that row's write is
//! still serialised, so subscribers observe a row's transitions in commit
//! order. No ordering is promised across different rows.

use std::{
	sync::{
		Arc, Mutex, PoisonError,
		atomic::{AtomicBool, AtomicU64, Ordering},
	},
	thread::{self, JoinHandle},
	time::Duration,
};

use chrono::Utc;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use saveplate_sdk::{Listing, ListingStatus, Notification, Reservation, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_FEED_SUBSCRIBER_CAPACITY;

pub type SequenceNumber = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
	FoodListings,
	Reservations,
	Notifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
	Insert,
	Update,
	Delete,
}

/// The row as it stands after the change (before it, for deletes)
///
/// Serialized as `{"table": "...", "record": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record")]
pub enum ChangeRow {
	#[serde(rename = "food_listings")]
	Listing(Listing),
	#[serde(rename = "reservations")]
	Reservation(Reservation),
	#[serde(rename = "notifications")]
	Notification(Notification),
}

impl ChangeRow {
	pub fn table(&self) -> Table {
		match self {
			ChangeRow::Listing(_) => Table::FoodListings,
			ChangeRow::Reservation(_) => Table::Reservations,
			ChangeRow::Notification(_) => Table::Notifications,
		}
	}

	pub fn id(&self) -> &str {
		match self {
			ChangeRow::Listing(l) => &l.id,
			ChangeRow::Reservation(r) => &r.id,
			ChangeRow::Notification(n) => &n.id,
		}
	}

	/// Status column, for rows that have one
	pub fn status(&self) -> Option<&'static str> {
		match self {
			ChangeRow::Listing(l) => Some(l.status.as_str()),
			ChangeRow::Reservation(r) => Some(r.status.as_str()),
			ChangeRow::Notification(_) => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
	pub seq: SequenceNumber,
	pub kind: ChangeKind,
	pub row: ChangeRow,
	/// Status before an update, if the row has one
	pub previous_status: Option<String>,
	/// Users entitled to see this row
	pub audience: Vec<UserId>,
	pub committed_at: Timestamp,
}

impl ChangeEvent {
	pub fn table(&self) -> Table {
		self.row.table()
	}

	pub fn is_visible_to(&self, user: &str) -> bool {
		self.audience.iter().any(|u| u == user)
	}

	/// Whether this update moved the row's status
	pub fn status_changed(&self) -> bool {
		self.kind == ChangeKind::Update
			&& self.previous_status.is_some()
			&& self.previous_status.as_deref() != self.row.status()
	}
}

/// Row predicate of a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
	/// Unscoped; for trusted in-process consumers such as the audit log
	Any,
	/// Rows whose audience includes this user
	VisibleTo(UserId),
	/// Listings currently in this status (the public browse feed)
	ListingStatus(ListingStatus),
}

#[derive(Debug, Clone)]
pub struct SubscriptionFilter {
	tables: Vec<Table>,
	kinds: Vec<ChangeKind>,
	rows: RowFilter,
}

impl SubscriptionFilter {
	/// All tables and event kinds, narrowed by `rows`
	pub fn new(rows: RowFilter) -> Self {
		Self {
			tables: Vec::new(),
			kinds: Vec::new(),
			rows,
		}
	}

	/// Everything the given user may see
	pub fn for_user(user: impl Into<UserId>) -> Self {
		Self::new(RowFilter::VisibleTo(user.into()))
	}

	/// Restrict to a table; may be called repeatedly
	pub fn table(mut self, table: Table) -> Self {
		self.tables.push(table);
		self
	}

	/// Restrict to an event kind; may be called repeatedly
	pub fn kind(mut self, kind: ChangeKind) -> Self {
		self.kinds.push(kind);
		self
	}

	pub fn matches(&self, event: &ChangeEvent) -> bool {
		if !self.tables.is_empty() && !self.tables.contains(&event.table()) {
			return false;
		}
		if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
			return false;
		}
		match &self.rows {
			RowFilter::Any => true,
			RowFilter::VisibleTo(user) => event.is_visible_to(user),
			RowFilter::ListingStatus(status) => {
				matches!(&event.row, ChangeRow::Listing(l) if l.status == *status)
			}
		}
	}
}

struct Subscriber {
	id: u64,
	filter: SubscriptionFilter,
	sender: Sender<ChangeEvent>,
}

/// Publish/subscribe hub keyed by table and row predicate
///
/// Each subscriber owns a bounded queue. A full queue drops the event for
/// that subscriber only; dashboards recover by re-fetching. Dropped
/// subscriptions are pruned on the next publish.
pub struct ChangeFeed {
	subscribers: Mutex<Vec<Subscriber>>,
	next_seq: AtomicU64,
	next_subscriber: AtomicU64,
	capacity: usize,
}

impl ChangeFeed {
	pub fn new(capacity: usize) -> Self {
		Self {
			subscribers: Mutex::new(Vec::new()),
			next_seq: AtomicU64::new(0),
			next_subscriber: AtomicU64::new(0),
			capacity: capacity.max(1),
		}
	}

	pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
		let (sender, receiver) = bounded(self.capacity);
		let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed) + 1;

		self.subscribers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push(Subscriber {
				id,
				filter,
				sender,
			});

		debug!(target: "feed", subscriber = id, "Subscriber registered");
		Subscription { id, receiver }
	}

	/// Register a callback invoked on a dedicated thread for every matching event
	///
	/// The callback stops when the returned listener is stopped or dropped.
	pub fn on<F>(&self, filter: SubscriptionFilter, mut callback: F) -> FeedListener
	where
		F: FnMut(ChangeEvent) + Send + 'static,
	{
		let subscription = self.subscribe(filter);
		let shutdown = Arc::new(AtomicBool::new(false));
		let shutdown_clone = shutdown.clone();

		let spawned = thread::Builder::new()
			.name(format!("feed-listener-{}", subscription.id))
			.spawn(move || {
				while !shutdown_clone.load(Ordering::Relaxed) {
					match subscription.receiver.recv_timeout(Duration::from_millis(50)) {
						Ok(event) => callback(event),
						Err(RecvTimeoutError::Timeout) => continue,
						Err(RecvTimeoutError::Disconnected) => break,
					}
				}
			});

		let thread_handle = match spawned {
			Ok(handle) => Some(handle),
			Err(e) => {
				warn!(target: "feed", error = %e, "Failed to spawn feed listener thread");
				None
			}
		};

		FeedListener {
			thread_handle,
			shutdown,
		}
	}

	/// Deliver a committed change to every matching subscriber
	///
	/// Callers must invoke this while the written row is still locked.
	pub fn publish(
		&self,
		kind: ChangeKind,
		row: ChangeRow,
		previous_status: Option<&'static str>,
		audience: Vec<UserId>,
	) -> SequenceNumber {
		let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);

		let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
		let event = ChangeEvent {
			seq,
			kind,
			row,
			previous_status: previous_status.map(str::to_string),
			audience,
			committed_at: Utc::now(),
		};

		subscribers.retain(|subscriber| {
			if !subscriber.filter.matches(&event) {
				return true;
			}
			match subscriber.sender.try_send(event.clone()) {
				Ok(()) => true,
				Err(TrySendError::Full(_)) => {
					warn!(
						target: "feed",
						subscriber = subscriber.id,
						seq = seq,
						"Subscriber queue full, event dropped"
					);
					true
				}
				Err(TrySendError::Disconnected(_)) => {
					debug!(target: "feed", subscriber = subscriber.id, "Subscriber pruned");
					false
				}
			}
		});

		seq
	}

	/// Sequence number of the most recently published event
	pub fn last_sequence(&self) -> SequenceNumber {
		self.next_seq.load(Ordering::SeqCst)
	}

	pub fn subscriber_count(&self) -> usize {
		self.subscribers
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}
}

impl Default for ChangeFeed {
	fn default() -> Self {
		Self::new(DEFAULT_FEED_SUBSCRIBER_CAPACITY)
	}
}

/// Receiving end of a feed subscription; dropping it unsubscribes
pub struct Subscription {
	id: u64,
	receiver: Receiver<ChangeEvent>,
}

impl Subscription {
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Block until the next event; `None` once the feed is gone
	pub fn recv(&self) -> Option<ChangeEvent> {
		self.receiver.recv().ok()
	}

	pub fn try_recv(&self) -> Option<ChangeEvent> {
		self.receiver.try_recv().ok()
	}

	pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
		self.receiver.recv_timeout(timeout).ok()
	}

	/// Take every event queued so far
	pub fn drain(&self) -> Vec<ChangeEvent> {
		self.receiver.try_iter().collect()
	}
}

/// Handle of a callback registered with [`ChangeFeed::on`]
pub struct FeedListener {
	thread_handle: Option<JoinHandle<()>>,
	shutdown: Arc<AtomicBool>,
}

impl FeedListener {
	pub fn stop(mut self) {
		self.halt();
		info!(target: "feed", "Feed listener stopped");
	}

	fn halt(&mut self) {
		self.shutdown.store(true, Ordering::Relaxed);
		if let Some(handle) = self.thread_handle.take()
			&& let Err(e) = handle.join()
		{
			warn!(target: "feed", error = ?e, "Feed listener thread panicked");
		}
	}
}

impl Drop for FeedListener {
	fn drop(&mut self) {
		self.halt();
	}
}
