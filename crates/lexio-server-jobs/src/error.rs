// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Result type for job execution.
pub type Result<T> = std::result::Result<T, JobError>;

/// Errors a job executor can settle with. The scheduler records them in
/// the job's local state; nothing here propagates to the periodic trigger.
#[derive(Debug, Error)]
pub enum JobError {
	#[error("job failed: {0}")]
	Failed(String),

	/// A cooperative executor observed its cancellation token and exited
	/// early.
	#[error("job cancelled")]
	Cancelled,
}
