/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Durable storage abstraction for queued work.
//!
//! The engine does not own a database: the embedding application supplies a
//! persistent key-value store through the [`DurableStore`] trait and the
//! queue writes JSON documents into it. Two implementations ship with the
//! crate:
//!
//! - [`MemoryStore`] — non-durable, for tests and ephemeral sessions.
//! - [`FilesystemStore`] — one JSON file per key under a root directory.

use async_trait::async_trait;

use crate::error::StorageError;

/// Persistent key-value storage for the durable queue.
///
/// Implementations must be safe for concurrent use; the queue serializes
/// its own writes but diagnostics may read concurrently. Keys are flat
/// strings with `/`-separated prefixes (e.g. `item/<id>`).
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Removes the value under `key`. Removing a missing key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Lists all `(key, value)` pairs whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;
}

/// In-memory store for tests and ephemeral sessions.
pub mod memory;

/// Filesystem-backed store: one JSON file per key.
pub mod filesystem;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
