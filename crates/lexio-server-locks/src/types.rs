// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_LOCK_TIME: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// The record persisted under a lock key in the shared store.
///
/// Timestamps are epoch milliseconds and the JSON keys are camelCase; this
/// is the wire shape every coordinating process reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
	pub lock_id: String,
	pub created_at: i64,
	pub expires_at: i64,
	pub process_id: String,
	pub hostname: String,
}

impl LockRecord {
	pub fn is_expired(&self, now_ms: i64) -> bool {
		now_ms > self.expires_at
	}
}

/// Per-acquire policy. `max_lock_time` is the lease: a holder that never
/// releases stops blocking contenders once it elapses.
#[derive(Debug, Clone)]
pub struct LockConfig {
	pub lock_key: String,
	pub max_lock_time: Duration,
	pub retry_interval: Duration,
	pub max_retries: u32,
}

impl LockConfig {
	pub fn new(lock_key: impl Into<String>) -> Self {
		Self {
			lock_key: lock_key.into(),
			max_lock_time: DEFAULT_MAX_LOCK_TIME,
			retry_interval: DEFAULT_RETRY_INTERVAL,
			max_retries: DEFAULT_MAX_RETRIES,
		}
	}
}

/// Outcome of an acquire attempt. A held lock is contention, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
	Acquired { lock_id: String },
	Contended { message: String },
}

impl AcquireOutcome {
	pub fn is_acquired(&self) -> bool {
		matches!(self, AcquireOutcome::Acquired { .. })
	}
}

/// Outcome of running an operation under a lock.
#[derive(Debug)]
pub enum LockedOutcome<T> {
	/// Lock was held for the duration and the operation returned a value.
	Completed(T),
	/// Lock was held elsewhere; the operation never ran.
	Contended { message: String },
	/// Lock was held for the duration but the operation failed.
	Failed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearAllOutcome {
	pub total: usize,
	pub deleted: usize,
}

#[derive(Debug, Clone)]
pub struct OwnedLock {
	pub lock_key: String,
	pub record: LockRecord,
}
