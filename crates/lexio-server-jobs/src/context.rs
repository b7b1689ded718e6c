// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::TriggerSource;

/// Per-attempt execution context handed to every executor.
pub struct JobContext {
	pub job_id: String,
	pub triggered_by: TriggerSource,
	pub cancellation_token: CancellationToken,
}

/// Cooperative cancellation signal. A watchdog timeout or a force-stop
/// cancels it; executors that never look at it simply run to completion,
/// and only the bookkeeping changes.
#[derive(Clone)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self {
			cancelled: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}

impl Default for CancellationToken {
	fn default() -> Self {
		Self::new()
	}
}
