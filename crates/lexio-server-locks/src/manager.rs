// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use lexio_server_db::KvStore;

use crate::error::Result;
use crate::types::{
	AcquireOutcome, ClearAllOutcome, LockConfig, LockRecord, LockedOutcome, OwnedLock,
};

/// Lease-based mutual exclusion over a shared [`KvStore`].
///
/// The only primitive the correctness argument rests on is the store's
/// atomic insert-if-absent; everything else here (retry loop, lazy expiry,
/// ownership check) assumes that primitive holds under concurrent access
/// from multiple processes and hosts.
pub struct LockManager {
	store: Arc<dyn KvStore>,
	process_id: String,
	hostname: String,
}

impl LockManager {
	pub fn new(store: Arc<dyn KvStore>) -> Self {
		let process_id = format!("{}_{}", std::process::id(), Utc::now().timestamp_millis());
		let hostname = hostname::get()
			.map(|h| h.to_string_lossy().to_string())
			.unwrap_or_else(|_| "localhost".to_string());

		Self {
			store,
			process_id,
			hostname,
		}
	}

	pub fn process_id(&self) -> &str {
		&self.process_id
	}

	/// Try to take the lease at `config.lock_key`.
	///
	/// Contention retries up to `max_retries` times, sleeping
	/// `retry_interval` between attempts; store I/O failures are returned
	/// immediately and never retried.
	#[instrument(skip(self, config), fields(lock_key = %config.lock_key))]
	pub async fn acquire(&self, config: &LockConfig) -> Result<AcquireOutcome> {
		let lock_id = self.generate_lock_id();

		for attempt in 0..=config.max_retries {
			// Lazy expiry: reclaim a dead owner's lease before trying to
			// take it ourselves. A failed reap is not fatal; the insert
			// below decides the attempt.
			if let Err(e) = self.reap_if_expired(&config.lock_key).await {
				warn!(error = %e, "could not check for an expired lock before acquiring");
			}

			let now = now_ms();
			let record = LockRecord {
				lock_id: lock_id.clone(),
				created_at: now,
				expires_at: now + config.max_lock_time.as_millis() as i64,
				process_id: self.process_id.clone(),
				hostname: self.hostname.clone(),
			};
			let value = serde_json::to_value(&record)?;

			match self.store.insert_if_absent(&config.lock_key, &value).await {
				Ok(()) => {
					debug!(lock_id = %lock_id, attempt, "lock acquired");
					return Ok(AcquireOutcome::Acquired { lock_id });
				}
				Err(e) if e.is_conflict() => {
					if attempt < config.max_retries {
						warn!(
							attempt = attempt + 1,
							total_attempts = config.max_retries + 1,
							retry_interval_ms = config.retry_interval.as_millis() as u64,
							"lock is held, waiting before retry"
						);
						tokio::time::sleep(config.retry_interval).await;
					} else {
						warn!(
							attempts = config.max_retries + 1,
							"lock is held, retries exhausted"
						);
						return Ok(contended(&config.lock_key));
					}
				}
				Err(e) => {
					error!(error = %e, "store failure while acquiring lock");
					return Err(e.into());
				}
			}
		}

		Ok(contended(&config.lock_key))
	}

	/// Release the lease at `lock_key`, but only if `lock_id` still owns it.
	///
	/// A missing record, an ownership mismatch, and a store failure all log
	/// and return false; this never deletes a lock held by someone else.
	#[instrument(skip(self))]
	pub async fn release(&self, lock_key: &str, lock_id: &str) -> bool {
		let existing = match self.store.get(lock_key).await {
			Ok(existing) => existing,
			Err(e) => {
				error!(error = %e, "store failure while releasing lock");
				return false;
			}
		};

		let Some(value) = existing else {
			warn!("released a lock that does not exist");
			return false;
		};

		let record: LockRecord = match serde_json::from_value(value) {
			Ok(record) => record,
			Err(e) => {
				error!(error = %e, "stored lock record is malformed");
				return false;
			}
		};

		if record.lock_id != lock_id {
			warn!(
				expected = %lock_id,
				actual = %record.lock_id,
				"refusing to release a lock owned elsewhere"
			);
			return false;
		}

		match self.store.delete(lock_key).await {
			Ok(deleted) => {
				if deleted {
					debug!(lock_id = %lock_id, "lock released");
				}
				deleted
			}
			Err(e) => {
				error!(error = %e, "store failure while deleting lock");
				false
			}
		}
	}

	/// Administrative release with no ownership check.
	#[instrument(skip(self))]
	pub async fn force_release(&self, lock_key: &str) -> bool {
		match self.store.delete(lock_key).await {
			Ok(deleted) => {
				if deleted {
					info!("lock force-released");
				}
				deleted
			}
			Err(e) => {
				error!(error = %e, "store failure while force-releasing lock");
				false
			}
		}
	}

	/// Current record at `lock_key`, or None. An expired record is deleted
	/// on the way out and reported as absent.
	#[instrument(skip(self))]
	pub async fn status(&self, lock_key: &str) -> Option<LockRecord> {
		let value = match self.store.get(lock_key).await {
			Ok(value) => value?,
			Err(e) => {
				error!(error = %e, "store failure while reading lock status");
				return None;
			}
		};

		let record: LockRecord = match serde_json::from_value(value) {
			Ok(record) => record,
			Err(e) => {
				error!(error = %e, "stored lock record is malformed");
				return None;
			}
		};

		if record.is_expired(now_ms()) {
			if let Err(e) = self.reap_if_expired(lock_key).await {
				warn!(error = %e, "could not reap expired lock during status check");
			}
			return None;
		}

		Some(record)
	}

	/// Acquire, run `operation`, and release exactly once before returning,
	/// whether the operation succeeded or failed. On contention or a store
	/// failure the operation never runs.
	pub async fn execute_with_lock<T, E, F, Fut>(
		&self,
		config: &LockConfig,
		operation: F,
	) -> Result<LockedOutcome<T>>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = std::result::Result<T, E>>,
		E: std::fmt::Display,
	{
		let lock_id = match self.acquire(config).await? {
			AcquireOutcome::Acquired { lock_id } => lock_id,
			AcquireOutcome::Contended { message } => {
				return Ok(LockedOutcome::Contended { message })
			}
		};

		let result = operation().await;

		if !self.release(&config.lock_key, &lock_id).await {
			warn!(lock_key = %config.lock_key, "lock did not release cleanly after operation");
		}

		match result {
			Ok(value) => Ok(LockedOutcome::Completed(value)),
			Err(e) => Ok(LockedOutcome::Failed {
				error: e.to_string(),
			}),
		}
	}

	/// Sweep every key and reap expired records. Returns the number
	/// reclaimed; per-key failures are logged and skipped.
	#[instrument(skip(self))]
	pub async fn cleanup_expired(&self) -> usize {
		let keys = match self.store.keys().await {
			Ok(keys) => keys,
			Err(e) => {
				error!(error = %e, "store failure while listing locks for cleanup");
				return 0;
			}
		};

		let mut reaped = 0;
		for key in keys {
			match self.reap_if_expired(&key).await {
				Ok(true) => reaped += 1,
				Ok(false) => {}
				Err(e) => warn!(lock_key = %key, error = %e, "skipping key during cleanup sweep"),
			}
		}

		if reaped > 0 {
			info!(reaped, "expired locks cleaned up");
		}
		reaped
	}

	/// Delete every lock in the store, owned or not.
	///
	/// This backs the process-boot hygiene hook. It is unsafe to call while
	/// sibling processes may already be running: a newly booting process
	/// will delete leases those siblings legitimately hold. Deployments
	/// that start processes concurrently should not wire this into boot.
	#[instrument(skip(self))]
	pub async fn clear_all(&self) -> ClearAllOutcome {
		let keys = match self.store.keys().await {
			Ok(keys) => keys,
			Err(e) => {
				error!(error = %e, "store failure while listing locks for clear");
				return ClearAllOutcome {
					total: 0,
					deleted: 0,
				};
			}
		};

		let total = keys.len();
		let mut deleted = 0;
		for key in keys {
			match self.store.delete(&key).await {
				Ok(true) => deleted += 1,
				Ok(false) => {}
				Err(e) => warn!(lock_key = %key, error = %e, "could not delete lock during clear"),
			}
		}

		info!(total, deleted, "cleared all locks");
		ClearAllOutcome { total, deleted }
	}

	/// Locks currently held by this process, for diagnostics.
	#[instrument(skip(self))]
	pub async fn process_locks(&self) -> Vec<OwnedLock> {
		let keys = match self.store.keys().await {
			Ok(keys) => keys,
			Err(e) => {
				error!(error = %e, "store failure while listing process locks");
				return Vec::new();
			}
		};

		let mut owned = Vec::new();
		for key in keys {
			let Ok(Some(value)) = self.store.get(&key).await else {
				continue;
			};
			let Ok(record) = serde_json::from_value::<LockRecord>(value) else {
				continue;
			};
			if record.process_id == self.process_id {
				owned.push(OwnedLock {
					lock_key: key,
					record,
				});
			}
		}

		owned
	}

	async fn reap_if_expired(&self, lock_key: &str) -> Result<bool> {
		let Some(value) = self.store.get(lock_key).await? else {
			return Ok(false);
		};
		let record: LockRecord = serde_json::from_value(value)?;

		if record.is_expired(now_ms()) {
			let deleted = self.store.delete(lock_key).await?;
			if deleted {
				info!(lock_key = %lock_key, expired_lock_id = %record.lock_id, "reaped expired lock");
			}
			return Ok(deleted);
		}

		Ok(false)
	}

	fn generate_lock_id(&self) -> String {
		format!("{}_{}", self.process_id, uuid::Uuid::new_v4())
	}
}

fn contended(lock_key: &str) -> AcquireOutcome {
	AcquireOutcome::Contended {
		message: format!("lock {lock_key} is held by another process"),
	}
}

fn now_ms() -> i64 {
	Utc::now().timestamp_millis()
}
