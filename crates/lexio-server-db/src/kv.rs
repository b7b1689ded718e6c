// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Key-value store boundary shared by every process that needs to
//! coordinate.
//!
//! `insert_if_absent` is the one primitive with a correctness requirement:
//! it must be a real conditional write (unique-constraint insert or an
//! in-memory check-and-insert under a single guard), never a read followed
//! by a write.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{DbError, Result};

#[async_trait]
pub trait KvStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<Value>>;

	/// Insert `value` at `key` only if the key is absent.
	///
	/// Returns `DbError::Conflict` when the key already exists; any other
	/// error is a store I/O failure.
	async fn insert_if_absent(&self, key: &str, value: &Value) -> Result<()>;

	/// Returns true when a row was actually removed.
	async fn delete(&self, key: &str) -> Result<bool>;

	async fn keys(&self) -> Result<Vec<String>>;
}

/// Durable SQLite-backed store. One table per coordination concern, chosen
/// by the caller (e.g. `distributed_locks`).
#[derive(Clone)]
pub struct SqliteKvStore {
	pool: SqlitePool,
	table: String,
}

impl SqliteKvStore {
	/// Table names are interpolated into SQL and therefore restricted to
	/// `[A-Za-z0-9_]+`.
	pub fn new(pool: SqlitePool, table: &str) -> Result<Self> {
		if table.is_empty()
			|| !table
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || c == '_')
		{
			return Err(DbError::Internal(format!("invalid table name: {table}")));
		}

		Ok(Self {
			pool,
			table: table.to_string(),
		})
	}

	pub async fn create_table(&self) -> Result<()> {
		sqlx::query(&format!(
			r#"
			CREATE TABLE IF NOT EXISTS {} (
				key TEXT PRIMARY KEY,
				value TEXT NOT NULL,
				created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
			)
			"#,
			self.table
		))
		.execute(&self.pool)
		.await?;

		Ok(())
	}
}

#[async_trait]
impl KvStore for SqliteKvStore {
	#[tracing::instrument(skip(self), fields(table = %self.table))]
	async fn get(&self, key: &str) -> Result<Option<Value>> {
		let row = sqlx::query_as::<_, (String,)>(&format!(
			"SELECT value FROM {} WHERE key = ?",
			self.table
		))
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|(value,)| serde_json::from_str(&value).map_err(DbError::from))
			.transpose()
	}

	#[tracing::instrument(skip(self, value), fields(table = %self.table))]
	async fn insert_if_absent(&self, key: &str, value: &Value) -> Result<()> {
		let result = sqlx::query(&format!(
			"INSERT INTO {} (key, value) VALUES (?, ?)",
			self.table
		))
		.bind(key)
		.bind(value.to_string())
		.execute(&self.pool)
		.await;

		match result {
			Ok(_) => Ok(()),
			Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
				Err(DbError::Conflict(format!("key already exists: {key}")))
			}
			Err(e) => Err(e.into()),
		}
	}

	#[tracing::instrument(skip(self), fields(table = %self.table))]
	async fn delete(&self, key: &str) -> Result<bool> {
		let result = sqlx::query(&format!("DELETE FROM {} WHERE key = ?", self.table))
			.bind(key)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self), fields(table = %self.table))]
	async fn keys(&self) -> Result<Vec<String>> {
		let rows = sqlx::query_as::<_, (String,)>(&format!(
			"SELECT key FROM {} ORDER BY key",
			self.table
		))
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(|(key,)| key).collect())
	}
}

/// In-memory store for tests and single-process deployments. The mutex is
/// held across the check and the insert, which keeps `insert_if_absent`
/// atomic within the process.
#[derive(Default)]
pub struct MemoryKvStore {
	entries: Mutex<HashMap<String, Value>>,
}

impl MemoryKvStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
		self.entries
			.lock()
			.map_err(|_| DbError::Internal("kv store mutex poisoned".to_string()))
	}
}

#[async_trait]
impl KvStore for MemoryKvStore {
	async fn get(&self, key: &str) -> Result<Option<Value>> {
		Ok(self.entries()?.get(key).cloned())
	}

	async fn insert_if_absent(&self, key: &str, value: &Value) -> Result<()> {
		let mut entries = self.entries()?;
		if entries.contains_key(key) {
			return Err(DbError::Conflict(format!("key already exists: {key}")));
		}
		entries.insert(key.to_string(), value.clone());
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<bool> {
		Ok(self.entries()?.remove(key).is_some())
	}

	async fn keys(&self) -> Result<Vec<String>> {
		let mut keys: Vec<String> = self.entries()?.keys().cloned().collect();
		keys.sort();
		Ok(keys)
	}
}
