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

#![forbid(unsafe_code)]
#![forbid(missing_docs)]

//! # Courier
//!
//! A small RPC and worker substrate built on Tokio.
//!
//! ## Key Concepts
//!
//! - **Dispatcher (`Dispatcher`)**: Pulls command packets pushed by any number
//!   of producers and runs the handler registered for each command. Every
//!   dispatch borrows one pooled database connection and one fresh cache
//!   connection, and the dispatcher returns both when the handler finishes,
//!   fails or panics.
//! - **Calls (`Caller`, `call`)**: One request, one response, one connection.
//!   Responses are matched by a random correlation token and may arrive
//!   zlib-compressed.
//! - **Reply server (`ReplyServer`)**: The answering side of a call.
//! - **Serial combinators (`serial`, `serial_lenient`)**: Run async steps
//!   strictly one after another.
//! - **Resources (`DatabasePool`, `CacheConnector`)**: The seams between the
//!   dispatcher and real backends; `postgres` and `redis` features provide
//!   adapters.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! struct Ping;
//!
//! #[async_trait]
//! impl CommandHandler<PoolConnection<Postgres>, MultiplexedConnection> for Ping {
//!     async fn handle(&self, _db: &mut _, _cache: &mut _, args: Vec<Value>) -> Result<(), HandlerError> {
//!         tracing::info!("ping with {} args", args.len());
//!         Ok(())
//!     }
//! }
//!
//! let config = CourierConfig::load();
//! let _guard = init_tracing(&config.logging);
//!
//! let mut builder = Dispatcher::builder(
//!     PgDatabasePool::connect_lazy(&config.database),
//!     RedisConnector::open(&config.cache)?,
//! );
//! builder.configure(&config).register("ping", Ping);
//! builder.build().run(&config.transport).await?;
//! ```

/// Remote calls: the requesting side.
pub mod call;

/// MessagePack encoding and zlib payload handling.
pub mod codec;

/// Configuration loading.
pub mod config;

/// Command dispatch.
pub mod dispatcher;

/// Wire envelopes.
pub mod envelope;

/// Error types.
pub mod error;

/// Remote calls: the answering side.
pub mod reply;

/// Database pool and cache connector seams.
pub mod resources;

/// Sequential task combinators.
pub mod serial;

/// Tracing subscriber setup.
pub mod telemetry;

/// Framed push/pull and request/reply sockets.
pub mod transport;

/// A prelude module for conveniently importing the most commonly used items.
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::call::{call, Caller};
    pub use crate::codec::Value;
    pub use crate::config::{CourierConfig, SaturationPolicy};
    pub use crate::dispatcher::{CommandHandler, Dispatcher, DispatcherHandle, DispatcherStats};
    pub use crate::envelope::{CallContext, CommandPacket};
    pub use crate::error::{CallError, HandlerError, ResourceError, TransportError};
    pub use crate::reply::{ReplyHandler, ReplyServer};
    pub use crate::resources::{CacheConnector, DatabasePool};
    pub use crate::serial::{serial, serial_lenient};
    pub use crate::telemetry::init_tracing;
    pub use crate::transport::{Endpoint, PushSocket};

    #[cfg(feature = "postgres")]
    pub use crate::resources::postgres::PgDatabasePool;
    #[cfg(feature = "redis")]
    pub use crate::resources::redis::RedisConnector;
}
