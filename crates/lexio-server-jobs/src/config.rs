// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scheduler configuration section.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfigLayer {
	pub lock_retry_interval_secs: Option<u64>,
	pub lock_max_retries: Option<u32>,
	pub default_max_execution_secs: Option<u64>,
}

impl SchedulerConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.lock_retry_interval_secs.is_some() {
			self.lock_retry_interval_secs = other.lock_retry_interval_secs;
		}
		if other.lock_max_retries.is_some() {
			self.lock_max_retries = other.lock_max_retries;
		}
		if other.default_max_execution_secs.is_some() {
			self.default_max_execution_secs = other.default_max_execution_secs;
		}
	}

	pub fn finalize(self) -> SchedulerConfig {
		SchedulerConfig {
			lock_retry_interval_secs: self.lock_retry_interval_secs.unwrap_or(5),
			lock_max_retries: self.lock_max_retries.unwrap_or(0),
			default_max_execution_secs: self.default_max_execution_secs.unwrap_or(1800), // 30 minutes
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
	/// Wait between lock attempts on the scheduled path. Moot while
	/// `lock_max_retries` stays 0.
	pub lock_retry_interval_secs: u64,
	/// Scheduled executions make `lock_max_retries + 1` acquire attempts.
	/// Zero: a contended cycle is skipped, the next cycle comes on its own.
	pub lock_max_retries: u32,
	pub default_max_execution_secs: u64,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			lock_retry_interval_secs: 5,
			lock_max_retries: 0,
			default_max_execution_secs: 1800, // 30 minutes
		}
	}
}

impl SchedulerConfig {
	pub fn lock_retry_interval(&self) -> Duration {
		Duration::from_secs(self.lock_retry_interval_secs)
	}

	pub fn default_max_execution_time(&self) -> Duration {
		Duration::from_secs(self.default_max_execution_secs)
	}
}
