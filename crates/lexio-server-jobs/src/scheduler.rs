// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use lexio_server_locks::{LockConfig, LockManager, LockedOutcome};

use crate::config::SchedulerConfig;
use crate::context::{CancellationToken, JobContext};
use crate::error::JobError;
use crate::executor::JobExecutor;
use crate::types::{
	ExecutionStatus, ForceStopResult, JobConfig, JobState, ManualRunResult, TriggerSource,
};

const LOCK_KEY_PREFIX: &str = "cron_job_";

struct RegisteredJob {
	config: JobConfig,
	executor: Arc<dyn JobExecutor>,
}

struct ActiveRun {
	generation: u64,
	cancellation_token: CancellationToken,
	watchdog: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SchedulerState {
	jobs: HashMap<String, RegisteredJob>,
	states: HashMap<String, JobState>,
	active: HashMap<String, ActiveRun>,
	next_generation: u64,
}

/// Per-process job scheduling manager.
///
/// An external periodic trigger calls [`execute_job`](Self::execute_job)
/// once per job per cycle; administrative callers use the remaining
/// surface. Nothing in here throws back to the trigger: contention is a
/// skipped cycle, executor failures land in [`JobState`].
pub struct JobScheduler {
	locks: Arc<LockManager>,
	config: SchedulerConfig,
	state: Arc<Mutex<SchedulerState>>,
}

impl JobScheduler {
	pub fn new(locks: Arc<LockManager>) -> Self {
		Self::with_config(locks, SchedulerConfig::default())
	}

	pub fn with_config(locks: Arc<LockManager>, config: SchedulerConfig) -> Self {
		Self {
			locks,
			config,
			state: Arc::new(Mutex::new(SchedulerState::default())),
		}
	}

	/// Register (or overwrite) a job. State is re-initialized to idle with
	/// zeroed counters either way.
	#[instrument(skip(self, config, executor), fields(job_id = %config.job_id))]
	pub fn register_job(&self, config: JobConfig, executor: Arc<dyn JobExecutor>) {
		let mut state = lock_state(&self.state);

		if state.jobs.contains_key(&config.job_id) {
			warn!("job is already registered and will be overwritten");
		}

		info!(name = %config.name, use_lock = config.use_lock, "job registered");
		state
			.states
			.insert(config.job_id.clone(), JobState::idle(&config));
		state
			.jobs
			.insert(config.job_id.clone(), RegisteredJob { config, executor });
	}

	/// Remove a job entirely, force-stopping it first if it is running.
	#[instrument(skip(self))]
	pub fn unregister_job(&self, job_id: &str) -> bool {
		let mut state = lock_state(&self.state);

		let Some(job) = state.jobs.get(job_id) else {
			return false;
		};
		let name = job.config.name.clone();

		if state.states.get(job_id).is_some_and(|s| s.is_running) {
			warn!("job is running during unregistration, force-stopping");
			close_current_run(&mut state, job_id);
		}

		state.jobs.remove(job_id);
		state.states.remove(job_id);
		state.active.remove(job_id);

		info!(name = %name, "job unregistered");
		true
	}

	/// Run one scheduled cycle for `job_id`. Called by the external
	/// periodic trigger; never returns an error to it.
	///
	/// Unknown and disabled jobs are no-ops. Lock-flagged jobs make a
	/// single acquire attempt; losing it means another process took this
	/// cycle and we skip quietly.
	#[instrument(skip(self))]
	pub async fn execute_job(&self, job_id: &str) {
		let (config, executor, enabled) = {
			let state = lock_state(&self.state);
			let Some(job) = state.jobs.get(job_id) else {
				error!("cannot execute unknown job");
				return;
			};
			let enabled = state.states.get(job_id).is_some_and(|s| s.enabled);
			(job.config.clone(), Arc::clone(&job.executor), enabled)
		};

		if !enabled {
			debug!("job disabled, skipping cycle");
			return;
		}

		if config.use_lock {
			self.run_with_distributed_lock(job_id, &config, executor)
				.await;
		} else {
			self.run_local(job_id, &config, executor, TriggerSource::Schedule)
				.await;
		}
	}

	/// Trigger a job outside its schedule.
	///
	/// This path never consults the distributed lock; the only overlap
	/// guard is this process's own running flag, so a manual run here can
	/// race a scheduled, lock-protected run on a sibling process.
	#[instrument(skip(self))]
	pub async fn manual_execute_job(&self, job_id: &str) -> ManualRunResult {
		let (config, executor) = {
			let state = lock_state(&self.state);
			let (Some(job), Some(job_state)) = (state.jobs.get(job_id), state.states.get(job_id))
			else {
				return ManualRunResult {
					success: false,
					message: format!("job {job_id} is not registered"),
					execution_time_ms: None,
					job_id: job_id.to_string(),
				};
			};

			if !job_state.enabled {
				return ManualRunResult {
					success: false,
					message: format!("job {job_id} is disabled"),
					execution_time_ms: None,
					job_id: job_id.to_string(),
				};
			}

			if job.config.use_lock && job_state.is_running {
				return ManualRunResult {
					success: false,
					message: format!("job {job_id} is already running"),
					execution_time_ms: None,
					job_id: job_id.to_string(),
				};
			}

			(job.config.clone(), Arc::clone(&job.executor))
		};

		info!(name = %config.name, "job triggered manually");
		let started = Instant::now();
		self.run_local(job_id, &config, executor, TriggerSource::Manual)
			.await;
		let execution_time_ms = started.elapsed().as_millis() as u64;

		ManualRunResult {
			success: true,
			message: format!("job {job_id} finished"),
			execution_time_ms: Some(execution_time_ms),
			job_id: job_id.to_string(),
		}
	}

	/// Clear the running flag and watchdog for a job. The executor itself
	/// is not interrupted; it only gets its cancellation token fired.
	#[instrument(skip(self))]
	pub fn force_stop_job(&self, job_id: &str) -> ForceStopResult {
		let mut state = lock_state(&self.state);

		let Some(job_state) = state.states.get(job_id) else {
			return ForceStopResult {
				success: false,
				message: format!("job {job_id} is not registered"),
			};
		};

		if !job_state.is_running {
			return ForceStopResult {
				success: false,
				message: format!("job {job_id} is not running"),
			};
		}

		warn!("force-stopping job; in-flight work is not interrupted");
		close_current_run(&mut state, job_id);

		ForceStopResult {
			success: true,
			message: format!("job {job_id} stopped"),
		}
	}

	pub fn set_job_enabled(&self, job_id: &str, enabled: bool) -> bool {
		let mut state = lock_state(&self.state);
		let Some(job_state) = state.states.get_mut(job_id) else {
			return false;
		};
		job_state.enabled = enabled;
		info!(job_id, enabled, "job enablement changed");
		true
	}

	pub fn get_job_status(&self, job_id: &str) -> Option<JobState> {
		lock_state(&self.state).states.get(job_id).cloned()
	}

	pub fn get_all_job_status(&self) -> Vec<JobState> {
		let mut statuses: Vec<JobState> = lock_state(&self.state).states.values().cloned().collect();
		statuses.sort_by(|a, b| a.job_id.cmp(&b.job_id));
		statuses
	}

	pub fn reset_job_stats(&self, job_id: &str) -> bool {
		let mut state = lock_state(&self.state);
		let Some(job_state) = state.states.get_mut(job_id) else {
			return false;
		};
		job_state.execution_count = 0;
		job_state.last_execution_time = None;
		job_state.last_execution_duration_ms = None;
		job_state.last_execution_status = None;
		job_state.last_error = None;
		info!(job_id, "job statistics reset");
		true
	}

	pub fn reset_all_stats(&self) {
		let job_ids: Vec<String> = lock_state(&self.state).states.keys().cloned().collect();
		for job_id in job_ids {
			self.reset_job_stats(&job_id);
		}
	}

	async fn run_with_distributed_lock(
		&self,
		job_id: &str,
		config: &JobConfig,
		executor: Arc<dyn JobExecutor>,
	) {
		let lock_config = LockConfig {
			lock_key: format!("{LOCK_KEY_PREFIX}{job_id}"),
			max_lock_time: self.max_execution_time(config),
			retry_interval: self.config.lock_retry_interval(),
			max_retries: self.config.lock_max_retries,
		};

		let outcome = self
			.locks
			.execute_with_lock(&lock_config, || async move {
				let (generation, token) = self.begin_run(job_id);
				let ctx = JobContext {
					job_id: job_id.to_string(),
					triggered_by: TriggerSource::Schedule,
					cancellation_token: token.clone(),
				};

				let started = Instant::now();
				let result = executor.execute(&ctx).await;
				self.finish_run(job_id, generation, &token, started, &result);
				result
			})
			.await;

		match outcome {
			Ok(LockedOutcome::Completed(())) => {}
			Ok(LockedOutcome::Contended { message }) => {
				debug!(job_id, %message, "cycle skipped, another process holds the lock");
			}
			Ok(LockedOutcome::Failed { error }) => {
				// Already recorded in the job state by finish_run.
				debug!(job_id, %error, "locked cycle finished with an executor failure");
			}
			Err(e) => {
				error!(job_id, error = %e, "lock store failure, cycle skipped");
			}
		}
	}

	/// Direct execution without the distributed lock: scheduled runs of
	/// no-lock jobs, and every manual trigger. Lock-flagged jobs on this
	/// path get a local watchdog for their max execution time.
	async fn run_local(
		&self,
		job_id: &str,
		config: &JobConfig,
		executor: Arc<dyn JobExecutor>,
		triggered_by: TriggerSource,
	) {
		let (generation, token) = self.begin_run(job_id);

		if config.use_lock {
			self.arm_watchdog(job_id, generation, self.max_execution_time(config));
		}

		let ctx = JobContext {
			job_id: job_id.to_string(),
			triggered_by,
			cancellation_token: token.clone(),
		};

		let started = Instant::now();
		let result = executor.execute(&ctx).await;
		self.finish_run(job_id, generation, &token, started, &result);
	}

	fn begin_run(&self, job_id: &str) -> (u64, CancellationToken) {
		let mut state = lock_state(&self.state);

		state.next_generation += 1;
		let generation = state.next_generation;
		let token = CancellationToken::new();

		if let Some(job_state) = state.states.get_mut(job_id) {
			job_state.is_running = true;
			job_state.current_execution_start = Some(Utc::now());
		}

		let previous = state.active.insert(
			job_id.to_string(),
			ActiveRun {
				generation,
				cancellation_token: token.clone(),
				watchdog: None,
			},
		);
		if let Some(ActiveRun {
			watchdog: Some(handle),
			..
		}) = previous
		{
			handle.abort();
		}

		(generation, token)
	}

	/// Record the outcome of a settled run. A run whose token was cancelled
	/// was already closed by the watchdog or a force-stop, and its late
	/// completion must not overwrite that bookkeeping.
	fn finish_run(
		&self,
		job_id: &str,
		generation: u64,
		token: &CancellationToken,
		started: Instant,
		result: &Result<(), JobError>,
	) {
		let mut state = lock_state(&self.state);

		if token.is_cancelled() {
			debug!(job_id, "run was closed before the executor settled, skipping bookkeeping");
			return;
		}

		if state
			.active
			.get(job_id)
			.is_some_and(|a| a.generation == generation)
		{
			if let Some(ActiveRun {
				watchdog: Some(handle),
				..
			}) = state.active.remove(job_id)
			{
				handle.abort();
			}
		}

		let elapsed_ms = started.elapsed().as_millis() as u64;
		let Some(job_state) = state.states.get_mut(job_id) else {
			return;
		};

		job_state.is_running = false;
		job_state.current_execution_start = None;
		job_state.last_execution_duration_ms = Some(elapsed_ms);

		match result {
			Ok(()) => {
				job_state.last_execution_time = Some(Utc::now());
				job_state.execution_count += 1;
				job_state.last_execution_status = Some(ExecutionStatus::Success);
				job_state.last_error = None;
				info!(job_id, duration_ms = elapsed_ms, "job completed");
			}
			Err(e) => {
				job_state.last_execution_status = Some(ExecutionStatus::Error);
				job_state.last_error = Some(e.to_string());
				error!(job_id, duration_ms = elapsed_ms, error = %e, "job failed");
			}
		}
	}

	/// Watchdog for locally-run, lock-flagged jobs: when the budget
	/// elapses before the executor settles, mark the run timed out and
	/// fire its cancellation token. The executor keeps running; there is
	/// no preemption in this subsystem.
	fn arm_watchdog(&self, job_id: &str, generation: u64, max_execution_time: Duration) {
		let state_arc = Arc::clone(&self.state);
		let task_job_id = job_id.to_string();

		let handle = tokio::spawn(async move {
			tokio::time::sleep(max_execution_time).await;

			let mut state = lock_state(&state_arc);
			if !state
				.active
				.get(&task_job_id)
				.is_some_and(|a| a.generation == generation)
			{
				return;
			}

			if let Some(active) = state.active.remove(&task_job_id) {
				active.cancellation_token.cancel();
			}
			if let Some(job_state) = state.states.get_mut(&task_job_id) {
				job_state.is_running = false;
				job_state.current_execution_start = None;
				job_state.last_execution_status = Some(ExecutionStatus::Timeout);
				error!(
					job_id = %task_job_id,
					max_execution_ms = max_execution_time.as_millis() as u64,
					"job exceeded its execution budget; marked timed out, executor left running"
				);
			}
		});

		let mut state = lock_state(&self.state);
		match state.active.get_mut(job_id) {
			Some(active) if active.generation == generation => {
				active.watchdog = Some(handle);
			}
			// The run settled or was closed before we got here.
			_ => handle.abort(),
		}
	}

	fn max_execution_time(&self, config: &JobConfig) -> Duration {
		config
			.max_execution_time
			.unwrap_or_else(|| self.config.default_max_execution_time())
	}
}

/// Close the job's current run: cancel its token, disarm its watchdog and
/// clear the running flag. Bookkeeping only; in-flight work continues.
fn close_current_run(state: &mut SchedulerState, job_id: &str) {
	if let Some(active) = state.active.remove(job_id) {
		active.cancellation_token.cancel();
		if let Some(handle) = active.watchdog {
			handle.abort();
		}
	}
	if let Some(job_state) = state.states.get_mut(job_id) {
		job_state.is_running = false;
		job_state.current_execution_start = None;
	}
}

fn lock_state(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
	// Poisoning only means another thread panicked mid-update; the state
	// map stays usable.
	state.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use lexio_server_db::{DbError, KvStore, MemoryKvStore};
	use serde_json::Value;
	use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

	struct MockExecutor {
		runs: AtomicU64,
		hold: Duration,
		fail: bool,
	}

	impl MockExecutor {
		fn instant() -> Arc<Self> {
			Arc::new(Self {
				runs: AtomicU64::new(0),
				hold: Duration::ZERO,
				fail: false,
			})
		}

		fn failing() -> Arc<Self> {
			Arc::new(Self {
				runs: AtomicU64::new(0),
				hold: Duration::ZERO,
				fail: true,
			})
		}

		fn holding(hold: Duration) -> Arc<Self> {
			Arc::new(Self {
				runs: AtomicU64::new(0),
				hold,
				fail: false,
			})
		}

		fn run_count(&self) -> u64 {
			self.runs.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl JobExecutor for MockExecutor {
		async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
			self.runs.fetch_add(1, Ordering::SeqCst);
			if !self.hold.is_zero() {
				tokio::time::sleep(self.hold).await;
			}
			if self.fail {
				return Err(JobError::Failed("synthetic failure".to_string()));
			}
			Ok(())
		}
	}

	/// Settles after a long sleep and records that it really completed.
	struct SlowExecutor {
		sleep: Duration,
		completed: AtomicBool,
	}

	#[async_trait]
	impl JobExecutor for SlowExecutor {
		async fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
			tokio::time::sleep(self.sleep).await;
			self.completed.store(true, Ordering::SeqCst);
			Ok(())
		}
	}

	/// Polls its cancellation token once per tick and exits when it fires.
	struct CooperativeExecutor {
		observed_cancel: AtomicBool,
	}

	#[async_trait]
	impl JobExecutor for CooperativeExecutor {
		async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
			loop {
				if ctx.cancellation_token.is_cancelled() {
					self.observed_cancel.store(true, Ordering::SeqCst);
					return Err(JobError::Cancelled);
				}
				tokio::time::sleep(Duration::from_millis(100)).await;
			}
		}
	}

	/// Every insert fails with a non-conflict store error.
	struct BrokenStore;

	#[async_trait]
	impl KvStore for BrokenStore {
		async fn get(&self, _key: &str) -> lexio_server_db::Result<Option<Value>> {
			Ok(None)
		}

		async fn insert_if_absent(
			&self,
			_key: &str,
			_value: &Value,
		) -> lexio_server_db::Result<()> {
			Err(DbError::Internal("disk on fire".to_string()))
		}

		async fn delete(&self, _key: &str) -> lexio_server_db::Result<bool> {
			Ok(false)
		}

		async fn keys(&self) -> lexio_server_db::Result<Vec<String>> {
			Ok(Vec::new())
		}
	}

	fn scheduler_over(store: Arc<dyn KvStore>) -> JobScheduler {
		JobScheduler::new(Arc::new(LockManager::new(store)))
	}

	fn memory_scheduler() -> JobScheduler {
		scheduler_over(Arc::new(MemoryKvStore::new()))
	}

	fn lock_job(job_id: &str) -> JobConfig {
		JobConfig {
			use_lock: true,
			..JobConfig::new(job_id, "Lock-protected job")
		}
	}

	#[tokio::test]
	async fn test_execute_unknown_job_is_a_noop() {
		let scheduler = memory_scheduler();
		scheduler.execute_job("ghost").await;
		assert!(scheduler.get_job_status("ghost").is_none());
	}

	#[tokio::test]
	async fn test_success_increments_count_and_records_status() {
		let scheduler = memory_scheduler();
		let executor = MockExecutor::instant();
		scheduler.register_job(JobConfig::new("sync", "Sync job"), executor.clone());

		scheduler.execute_job("sync").await;
		scheduler.execute_job("sync").await;

		assert_eq!(executor.run_count(), 2);
		let status = scheduler.get_job_status("sync").unwrap();
		assert_eq!(status.execution_count, 2);
		assert_eq!(status.last_execution_status, Some(ExecutionStatus::Success));
		assert!(status.last_execution_time.is_some());
		assert!(status.last_execution_duration_ms.is_some());
		assert!(status.last_error.is_none());
		assert!(!status.is_running);
	}

	#[tokio::test]
	async fn test_failure_records_error_without_incrementing_count() {
		let scheduler = memory_scheduler();
		let executor = MockExecutor::failing();
		scheduler.register_job(JobConfig::new("sync", "Sync job"), executor.clone());

		scheduler.execute_job("sync").await;

		assert_eq!(executor.run_count(), 1);
		let status = scheduler.get_job_status("sync").unwrap();
		assert_eq!(status.execution_count, 0);
		assert_eq!(status.last_execution_status, Some(ExecutionStatus::Error));
		assert!(status.last_error.as_deref().unwrap().contains("synthetic"));
		assert!(status.last_execution_time.is_none());
		assert!(!status.is_running);
	}

	#[tokio::test]
	async fn test_disabled_job_is_skipped() {
		let scheduler = memory_scheduler();
		let executor = MockExecutor::instant();
		scheduler.register_job(JobConfig::new("sync", "Sync job"), executor.clone());

		assert!(scheduler.set_job_enabled("sync", false));
		scheduler.execute_job("sync").await;

		assert_eq!(executor.run_count(), 0);
		let status = scheduler.get_job_status("sync").unwrap();
		assert_eq!(status.execution_count, 0);
		assert!(status.last_execution_status.is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_concurrent_schedulers_one_winner_per_cycle() {
		let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
		let a = scheduler_over(Arc::clone(&store));
		let b = scheduler_over(Arc::clone(&store));

		let exec_a = MockExecutor::holding(Duration::from_millis(100));
		let exec_b = MockExecutor::holding(Duration::from_millis(100));
		a.register_job(lock_job("billing"), exec_a.clone());
		b.register_job(lock_job("billing"), exec_b.clone());

		tokio::join!(a.execute_job("billing"), b.execute_job("billing"));

		let total = exec_a.run_count() + exec_b.run_count();
		assert_eq!(total, 1, "exactly one process may run the cycle");

		let count_a = a.get_job_status("billing").unwrap().execution_count;
		let count_b = b.get_job_status("billing").unwrap().execution_count;
		assert_eq!(count_a + count_b, 1);

		// The losing scheduler records nothing at all for the cycle.
		let loser = if exec_a.run_count() == 0 { &a } else { &b };
		let status = loser.get_job_status("billing").unwrap();
		assert!(status.last_execution_status.is_none());
		assert!(!status.is_running);

		// The winner released the lock on its way out.
		assert!(store.keys().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_lock_store_failure_does_not_reach_the_trigger() {
		let scheduler = scheduler_over(Arc::new(BrokenStore));
		let executor = MockExecutor::instant();
		scheduler.register_job(lock_job("billing"), executor.clone());

		scheduler.execute_job("billing").await;

		assert_eq!(executor.run_count(), 0);
		let status = scheduler.get_job_status("billing").unwrap();
		assert_eq!(status.execution_count, 0);
		assert!(!status.is_running);
	}

	#[tokio::test]
	async fn test_manual_run_rejections() {
		let scheduler = memory_scheduler();

		let result = scheduler.manual_execute_job("ghost").await;
		assert!(!result.success);
		assert!(result.message.contains("not registered"));

		scheduler.register_job(JobConfig::new("sync", "Sync job"), MockExecutor::instant());
		scheduler.set_job_enabled("sync", false);
		let result = scheduler.manual_execute_job("sync").await;
		assert!(!result.success);
		assert!(result.message.contains("disabled"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_manual_run_rejected_while_lock_job_is_running() {
		let scheduler = Arc::new(memory_scheduler());
		scheduler.register_job(
			lock_job("billing"),
			MockExecutor::holding(Duration::from_secs(10)),
		);

		let background = {
			let scheduler = Arc::clone(&scheduler);
			tokio::spawn(async move { scheduler.manual_execute_job("billing").await })
		};
		tokio::task::yield_now().await;

		assert!(scheduler.get_job_status("billing").unwrap().is_running);
		let result = scheduler.manual_execute_job("billing").await;
		assert!(!result.success);
		assert!(result.message.contains("already running"));

		let first = background.await.unwrap();
		assert!(first.success);
	}

	#[tokio::test]
	async fn test_manual_run_ignores_the_distributed_lock() {
		let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
		let sibling = LockManager::new(Arc::clone(&store));
		let held = sibling
			.acquire(&lexio_server_locks::LockConfig {
				max_retries: 0,
				..lexio_server_locks::LockConfig::new("cron_job_billing")
			})
			.await
			.unwrap();
		assert!(held.is_acquired());

		let scheduler = scheduler_over(store);
		let executor = MockExecutor::instant();
		scheduler.register_job(lock_job("billing"), executor.clone());

		let result = scheduler.manual_execute_job("billing").await;
		assert!(result.success);
		assert!(result.execution_time_ms.is_some());
		assert_eq!(executor.run_count(), 1, "manual runs bypass the lock");
	}

	#[tokio::test(start_paused = true)]
	async fn test_watchdog_marks_timeout_and_leaves_executor_running() {
		let scheduler = Arc::new(memory_scheduler());
		let executor = Arc::new(SlowExecutor {
			sleep: Duration::from_secs(10),
			completed: AtomicBool::new(false),
		});

		let config = JobConfig {
			max_execution_time: Some(Duration::from_secs(5)),
			..lock_job("billing")
		};
		scheduler.register_job(config, executor.clone());

		let background = {
			let scheduler = Arc::clone(&scheduler);
			tokio::spawn(async move { scheduler.manual_execute_job("billing").await })
		};

		// Past the budget but before the executor settles.
		tokio::time::sleep(Duration::from_secs(6)).await;
		let status = scheduler.get_job_status("billing").unwrap();
		assert_eq!(status.last_execution_status, Some(ExecutionStatus::Timeout));
		assert!(!status.is_running);
		assert!(
			!executor.completed.load(Ordering::SeqCst),
			"timeout must be recorded before the executor settles"
		);

		// Let the executor finish naturally; the timeout must stick.
		let result = background.await.unwrap();
		assert!(result.success);
		assert!(executor.completed.load(Ordering::SeqCst));

		let status = scheduler.get_job_status("billing").unwrap();
		assert_eq!(status.last_execution_status, Some(ExecutionStatus::Timeout));
		assert_eq!(status.execution_count, 0);
		assert!(!status.is_running);
	}

	#[tokio::test(start_paused = true)]
	async fn test_force_stop_clears_state_and_fires_cancellation() {
		let scheduler = Arc::new(memory_scheduler());
		let executor = Arc::new(CooperativeExecutor {
			observed_cancel: AtomicBool::new(false),
		});
		scheduler.register_job(JobConfig::new("sync", "Sync job"), executor.clone());

		let background = {
			let scheduler = Arc::clone(&scheduler);
			tokio::spawn(async move { scheduler.manual_execute_job("sync").await })
		};
		tokio::task::yield_now().await;
		assert!(scheduler.get_job_status("sync").unwrap().is_running);

		let stopped = scheduler.force_stop_job("sync");
		assert!(stopped.success);

		let status = scheduler.get_job_status("sync").unwrap();
		assert!(!status.is_running);
		assert!(status.current_execution_start.is_none());

		// The executor observes the token on its next tick and exits; its
		// late settle must not touch the bookkeeping.
		background.await.unwrap();
		assert!(executor.observed_cancel.load(Ordering::SeqCst));
		let status = scheduler.get_job_status("sync").unwrap();
		assert_eq!(status.execution_count, 0);
		assert!(status.last_execution_status.is_none());

		let again = scheduler.force_stop_job("sync");
		assert!(!again.success);
		assert!(again.message.contains("not running"));
	}

	#[tokio::test]
	async fn test_force_stop_rejects_unknown_and_idle_jobs() {
		let scheduler = memory_scheduler();

		assert!(!scheduler.force_stop_job("ghost").success);

		scheduler.register_job(JobConfig::new("sync", "Sync job"), MockExecutor::instant());
		let result = scheduler.force_stop_job("sync");
		assert!(!result.success);
		assert!(result.message.contains("not running"));
	}

	#[tokio::test]
	async fn test_reregistration_resets_state() {
		let scheduler = memory_scheduler();
		let executor = MockExecutor::instant();
		scheduler.register_job(JobConfig::new("sync", "Sync job"), executor.clone());
		scheduler.execute_job("sync").await;
		assert_eq!(
			scheduler.get_job_status("sync").unwrap().execution_count,
			1
		);

		scheduler.register_job(JobConfig::new("sync", "Sync job v2"), executor);
		let status = scheduler.get_job_status("sync").unwrap();
		assert_eq!(status.execution_count, 0);
		assert_eq!(status.name, "Sync job v2");
		assert!(status.last_execution_status.is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_unregister_running_job_force_stops_it() {
		let scheduler = Arc::new(memory_scheduler());
		let executor = Arc::new(SlowExecutor {
			sleep: Duration::from_secs(10),
			completed: AtomicBool::new(false),
		});
		scheduler.register_job(JobConfig::new("sync", "Sync job"), executor.clone());

		let background = {
			let scheduler = Arc::clone(&scheduler);
			tokio::spawn(async move { scheduler.manual_execute_job("sync").await })
		};
		tokio::task::yield_now().await;

		assert!(scheduler.unregister_job("sync"));
		assert!(scheduler.get_job_status("sync").is_none());
		assert!(!scheduler.unregister_job("sync"));

		// The in-flight executor settles without resurrecting any state.
		background.await.unwrap();
		assert!(executor.completed.load(Ordering::SeqCst));
		assert!(scheduler.get_job_status("sync").is_none());
	}

	#[tokio::test]
	async fn test_reset_stats() {
		let scheduler = memory_scheduler();
		scheduler.register_job(JobConfig::new("a", "Job A"), MockExecutor::instant());
		scheduler.register_job(JobConfig::new("b", "Job B"), MockExecutor::instant());
		scheduler.execute_job("a").await;
		scheduler.execute_job("b").await;

		assert!(scheduler.reset_job_stats("a"));
		let status = scheduler.get_job_status("a").unwrap();
		assert_eq!(status.execution_count, 0);
		assert!(status.last_execution_status.is_none());
		assert!(status.last_execution_time.is_none());
		assert_eq!(
			scheduler.get_job_status("b").unwrap().execution_count,
			1,
			"resetting one job leaves the others alone"
		);

		scheduler.reset_all_stats();
		assert!(scheduler
			.get_all_job_status()
			.iter()
			.all(|s| s.execution_count == 0));

		assert!(!scheduler.reset_job_stats("ghost"));
	}

	#[tokio::test]
	async fn test_get_all_job_status_is_sorted() {
		let scheduler = memory_scheduler();
		scheduler.register_job(JobConfig::new("b", "Job B"), MockExecutor::instant());
		scheduler.register_job(JobConfig::new("a", "Job A"), MockExecutor::instant());

		let ids: Vec<String> = scheduler
			.get_all_job_status()
			.into_iter()
			.map(|s| s.job_id)
			.collect();
		assert_eq!(ids, vec!["a", "b"]);
	}
}
