// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

/// Errors that can escape the lock manager. Contention is not among them:
/// a held lock is an expected outcome, reported as a value.
#[derive(Debug, Error)]
pub enum LockError {
	#[error("lock store error: {0}")]
	Store(#[from] lexio_server_db::DbError),

	#[error("lock record serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}
