// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::context::JobContext;
use crate::error::JobError;

/// A unit of scheduled work. Opaque to the scheduler beyond settling or
/// failing; duration and outcome are recorded around the call.
///
/// Executors cannot be preempted. Long-running work should poll
/// `ctx.cancellation_token` and return [`JobError::Cancelled`] when it
/// fires.
#[async_trait]
pub trait JobExecutor: Send + Sync {
	async fn execute(&self, ctx: &JobContext) -> std::result::Result<(), JobError>;
}
