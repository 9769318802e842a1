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

//! The contract between the dispatcher and application command handlers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::Value;
use crate::error::HandlerError;

/// Handles one registered command.
///
/// The dispatcher lends the handler a database connection and a cache
/// connection for the duration of [`handle`](Self::handle). When the returned
/// future resolves (or panics) the dispatcher closes the cache connection and
/// releases the database connection itself; handlers never clean up.
///
/// # Example
///
/// ```rust,ignore
/// struct CreateUser;
///
/// #[async_trait]
/// impl CommandHandler<PoolConnection<Postgres>, MultiplexedConnection> for CreateUser {
///     async fn handle(
///         &self,
///         db: &mut PoolConnection<Postgres>,
///         cache: &mut MultiplexedConnection,
///         args: Vec<Value>,
///     ) -> Result<(), HandlerError> {
///         let name = args.first().and_then(Value::as_str).context("missing name")?;
///         sqlx::query("INSERT INTO users (name) VALUES ($1)").bind(name).execute(&mut **db).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait CommandHandler<D, C>: Send + Sync + 'static
where
    D: Send + 'static,
    C: Send + 'static,
{
    /// Run the command. `args` are the packet's positional arguments in order.
    async fn handle(&self, db: &mut D, cache: &mut C, args: Vec<Value>) -> Result<(), HandlerError>;
}

/// Shared, type-erased handler as stored in the registration table.
pub(crate) type SharedHandler<D, C> = Arc<dyn CommandHandler<D, C>>;
