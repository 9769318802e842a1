/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Per-dispatch resources: pooled database connections and fresh cache
//! connections.
//!
//! The dispatcher only ever talks to these traits. It acquires one database
//! connection and opens one cache connection per message, lends both to the
//! handler, and hands them back through [`DatabasePool::release`] and
//! [`CacheConnector::close`] exactly once when the handler is done.
//!
//! Adapters for PostgreSQL (`postgres` feature) and Redis (`redis` feature)
//! are provided; anything else can implement the traits directly.

use async_trait::async_trait;

use crate::error::ResourceError;

/// A bounded pool of database connections.
#[async_trait]
pub trait DatabasePool: Send + Sync + 'static {
    /// Connection type leased to handlers.
    type Connection: Send + 'static;

    /// Lease a connection, waiting for a free slot if necessary.
    async fn acquire(&self) -> Result<Self::Connection, ResourceError>;

    /// Return a leased connection to the pool.
    ///
    /// Pools whose connections return themselves on drop can rely on the
    /// default implementation.
    async fn release(&self, connection: Self::Connection) {
        drop(connection);
    }
}

/// A factory for short-lived cache connections.
#[async_trait]
pub trait CacheConnector: Send + Sync + 'static {
    /// Connection type lent to handlers.
    type Connection: Send + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, ResourceError>;

    /// Close a connection opened by [`connect`](Self::connect).
    async fn close(&self, connection: Self::Connection) {
        drop(connection);
    }
}

/// PostgreSQL pool backed by `sqlx`.
#[cfg(feature = "postgres")]
pub mod postgres;

/// Redis connector backed by the `redis` crate.
#[cfg(feature = "redis")]
pub mod redis;
