// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static job configuration, supplied at registration. Immutable
/// afterwards except enablement, which is runtime state and lives in
/// [`JobState`].
#[derive(Debug, Clone)]
pub struct JobConfig {
	pub job_id: String,
	pub name: String,
	/// Route scheduled executions through the distributed lock so at most
	/// one process runs this job per cycle.
	pub use_lock: bool,
	/// Lease duration for lock-protected runs and watchdog budget for
	/// local runs. Falls back to the scheduler-wide default (30 min) when
	/// unset.
	pub max_execution_time: Option<Duration>,
	pub enabled: bool,
	pub description: Option<String>,
}

impl JobConfig {
	pub fn new(job_id: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			job_id: job_id.into(),
			name: name.into(),
			use_lock: false,
			max_execution_time: None,
			enabled: true,
			description: None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
	Success,
	Error,
	Timeout,
}

impl ExecutionStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ExecutionStatus::Success => "success",
			ExecutionStatus::Error => "error",
			ExecutionStatus::Timeout => "timeout",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
	Schedule,
	Manual,
}

impl TriggerSource {
	pub fn as_str(&self) -> &'static str {
		match self {
			TriggerSource::Schedule => "schedule",
			TriggerSource::Manual => "manual",
		}
	}
}

/// Runtime state of one registered job in this process. Never persisted
/// and never shared across processes; the status API serves exactly this.
#[derive(Debug, Clone, Serialize)]
pub struct JobState {
	pub job_id: String,
	pub name: String,
	pub is_running: bool,
	pub last_execution_time: Option<DateTime<Utc>>,
	pub execution_count: u64,
	pub enabled: bool,
	pub current_execution_start: Option<DateTime<Utc>>,
	pub last_execution_duration_ms: Option<u64>,
	pub last_execution_status: Option<ExecutionStatus>,
	pub last_error: Option<String>,
}

impl JobState {
	pub fn idle(config: &JobConfig) -> Self {
		Self {
			job_id: config.job_id.clone(),
			name: config.name.clone(),
			is_running: false,
			last_execution_time: None,
			execution_count: 0,
			enabled: config.enabled,
			current_execution_start: None,
			last_execution_duration_ms: None,
			last_execution_status: None,
			last_error: None,
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct ManualRunResult {
	pub success: bool,
	pub message: String,
	pub execution_time_ms: Option<u64>,
	pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForceStopResult {
	pub success: bool,
	pub message: String,
}
