// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::kv::SqliteKvStore;

pub async fn create_test_pool() -> SqlitePool {
	SqlitePool::connect(":memory:").await.unwrap()
}

pub async fn create_kv_test_store(table: &str) -> SqliteKvStore {
	let pool = create_test_pool().await;
	let store = SqliteKvStore::new(pool, table).unwrap();
	store.create_table().await.unwrap();
	store
}
