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

//! The command dispatcher.
//!
//! A [`Dispatcher`] binds a pull endpoint, decodes every frame pushed to it as
//! a [`CommandPacket`], and runs the handler registered for the packet's
//! command against a pooled database connection and a fresh cache connection.
//!
//! # Lifecycle
//!
//! ```text
//! DispatcherBuilder ──register()──▶ build() ──▶ Dispatcher ──start()──▶ DispatcherHandle ──stop()
//! ```
//!
//! The registration table is frozen by [`DispatcherBuilder::build`]; nothing
//! can change it while the receive loop is running.
//!
//! # Per-message flow
//!
//! 1. Decode. A malformed frame is logged and dropped.
//! 2. Look up the command. An unknown command is logged and dropped without
//!    touching the pool; the sender is never told.
//! 3. Spawn a chain that acquires a database connection and opens a cache
//!    connection. If either fails the message is logged and dropped and the
//!    handler is never invoked.
//! 4. Invoke the handler with the packet's arguments.
//! 5. Close the cache connection and release the database connection, whether
//!    the handler succeeded, failed or panicked.
//!
//! The receive loop never waits for handlers. Concurrency is capped at the
//! pool size; what happens to messages beyond that is chosen by
//! [`SaturationPolicy`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::codec;
use crate::config::{CourierConfig, DatabaseConfig, SaturationPolicy, TransportConfig};
use crate::envelope::CommandPacket;
use crate::error::TransportError;
use crate::resources::{CacheConnector, DatabasePool};
use crate::transport::{Endpoint, PullSocket};

// --- Public Re-exports ---
pub use handler::CommandHandler;
pub use stats::DispatcherStats;

use handler::SharedHandler;

// --- Submodules ---

/// The handler contract.
mod handler;

/// Dispatcher counters.
mod stats;

type Handlers<P, K> = HashMap<
    String,
    SharedHandler<<P as DatabasePool>::Connection, <K as CacheConnector>::Connection>,
>;

/// Collects handler registrations and settings for a [`Dispatcher`].
pub struct DispatcherBuilder<P, K>
where
    P: DatabasePool,
    K: CacheConnector,
{
    pool: P,
    cache: K,
    handlers: Handlers<P, K>,
    concurrency: usize,
    saturation: SaturationPolicy,
}

impl<P, K> DispatcherBuilder<P, K>
where
    P: DatabasePool,
    K: CacheConnector,
{
    /// Starts a builder around the given resources.
    ///
    /// Concurrency defaults to the default pool ceiling and the saturation
    /// policy to [`SaturationPolicy::Queue`].
    #[must_use]
    pub fn new(pool: P, cache: K) -> Self {
        Self {
            pool,
            cache,
            handlers: HashMap::new(),
            concurrency: DatabaseConfig::default().concurrency(),
            saturation: SaturationPolicy::default(),
        }
    }

    /// Registers `handler` for `cmd`.
    ///
    /// Command names are not validated. Registering a name twice replaces the
    /// earlier handler.
    pub fn register<H>(&mut self, cmd: impl Into<String>, handler: H) -> &mut Self
    where
        H: CommandHandler<P::Connection, K::Connection>,
    {
        let cmd = cmd.into();
        if self.handlers.insert(cmd.clone(), Arc::new(handler)).is_some() {
            warn!("Handler for '{}' replaced by a later registration", cmd);
        } else {
            trace!("Registered handler for '{}'", cmd);
        }
        self
    }

    /// Takes the concurrency limit from the database pool ceiling and the
    /// saturation policy from the dispatch section.
    pub fn configure(&mut self, config: &CourierConfig) -> &mut Self {
        self.concurrency = config.database.concurrency();
        self.saturation = config.dispatch.saturation;
        self
    }

    /// Sets the maximum number of dispatches holding resources at once.
    pub fn concurrency(&mut self, limit: usize) -> &mut Self {
        self.concurrency = limit.max(1);
        self
    }

    /// Sets the saturation policy.
    pub fn saturation(&mut self, policy: SaturationPolicy) -> &mut Self {
        self.saturation = policy;
        self
    }

    /// Freezes the registration table.
    #[must_use]
    pub fn build(self) -> Dispatcher<P, K> {
        debug!(
            commands = self.handlers.len(),
            concurrency = self.concurrency,
            saturation = ?self.saturation,
            "Dispatcher built"
        );
        Dispatcher {
            inner: Arc::new(DispatcherInner {
                pool: self.pool,
                cache: self.cache,
                handlers: self.handlers,
                slots: Arc::new(Semaphore::new(self.concurrency)),
                saturation: self.saturation,
                stats: Arc::new(DispatcherStats::new()),
            }),
        }
    }
}

/// Routes pulled command packets to registered handlers.
///
/// Cloning is cheap; clones share the registration table, resources and
/// statistics.
pub struct Dispatcher<P, K>
where
    P: DatabasePool,
    K: CacheConnector,
{
    inner: Arc<DispatcherInner<P, K>>,
}

struct DispatcherInner<P, K>
where
    P: DatabasePool,
    K: CacheConnector,
{
    pool: P,
    cache: K,
    handlers: Handlers<P, K>,
    slots: Arc<Semaphore>,
    saturation: SaturationPolicy,
    stats: Arc<DispatcherStats>,
}

impl<P, K> Clone for Dispatcher<P, K>
where
    P: DatabasePool,
    K: CacheConnector,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, K> std::fmt::Debug for Dispatcher<P, K>
where
    P: DatabasePool,
    K: CacheConnector,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut commands: Vec<&str> = self.commands().collect();
        commands.sort_unstable();
        f.debug_struct("Dispatcher")
            .field("commands", &commands)
            .field("saturation", &self.inner.saturation)
            .finish_non_exhaustive()
    }
}

impl<P, K> Dispatcher<P, K>
where
    P: DatabasePool,
    K: CacheConnector,
{
    /// Starts building a dispatcher around the given resources.
    #[must_use]
    pub fn builder(pool: P, cache: K) -> DispatcherBuilder<P, K> {
        DispatcherBuilder::new(pool, cache)
    }

    /// Shared statistics.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Returns `true` if a handler is registered for `cmd`.
    #[must_use]
    pub fn is_registered(&self, cmd: &str) -> bool {
        self.inner.handlers.contains_key(cmd)
    }

    /// Registered command names, in no particular order.
    pub fn commands(&self) -> impl Iterator<Item = &str> + '_ {
        self.inner.handlers.keys().map(String::as_str)
    }

    /// Binds the configured pull endpoint and spawns the receive loop.
    pub async fn start(&self, config: &TransportConfig) -> Result<DispatcherHandle, TransportError> {
        let endpoint = config.pull_endpoint()?;
        let pull = PullSocket::bind(&endpoint, config.max_frame_size, config.queue_capacity).await?;
        let bound = pull.endpoint().clone();

        let cancel_token = CancellationToken::new();
        let dispatcher = self.clone();
        let loop_token = cancel_token.clone();
        let task = tokio::spawn(async move {
            dispatcher.serve(pull, loop_token).await;
        });

        Ok(DispatcherHandle {
            endpoint: bound,
            stats: self.stats(),
            cancel_token,
            task,
        })
    }

    /// Binds the configured pull endpoint and runs the receive loop on the
    /// current task. Only returns early if binding fails or the endpoint
    /// closes.
    pub async fn run(&self, config: &TransportConfig) -> Result<(), TransportError> {
        self.run_until_cancelled(config, CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), returning once `cancel_token` is cancelled.
    pub async fn run_until_cancelled(
        &self,
        config: &TransportConfig,
        cancel_token: CancellationToken,
    ) -> Result<(), TransportError> {
        let endpoint = config.pull_endpoint()?;
        let pull = PullSocket::bind(&endpoint, config.max_frame_size, config.queue_capacity).await?;
        self.serve(pull, cancel_token).await;
        Ok(())
    }

    /// Runs the receive loop over an already-bound pull socket until
    /// `cancel_token` is cancelled. Cancellation is checked between messages;
    /// dispatches already spawned keep running.
    pub async fn serve(&self, mut pull: PullSocket, cancel_token: CancellationToken) {
        info!(
            "Dispatcher listening on {} ({} commands registered)",
            pull.endpoint(),
            self.inner.handlers.len()
        );

        loop {
            tokio::select! {
                biased;

                () = cancel_token.cancelled() => {
                    info!("Dispatcher received shutdown signal");
                    break;
                }

                frame = pull.recv() => {
                    let Some(frame) = frame else {
                        warn!("Pull endpoint closed, dispatcher stopping");
                        break;
                    };
                    self.dispatch_until(&frame, &cancel_token).await;
                }
            }
        }

        pull.close();
        info!("Dispatcher shut down");
    }

    /// Handles one inbound frame.
    ///
    /// Returns the spawned dispatch chain, or `None` if the frame was dropped
    /// (malformed, unknown command, saturated under [`SaturationPolicy::Drop`],
    /// or the receive loop stopped while waiting under
    /// [`SaturationPolicy::Block`]). The receive loop never awaits the chain;
    /// the handle is there for embedders and tests that want to.
    pub async fn dispatch(&self, frame: &[u8]) -> Option<JoinHandle<()>> {
        self.dispatch_until(frame, &CancellationToken::new()).await
    }

    /// Like [`dispatch`](Self::dispatch), abandoning a wait for a slot under
    /// [`SaturationPolicy::Block`] once `cancel_token` is cancelled.
    async fn dispatch_until(
        &self,
        frame: &[u8],
        cancel_token: &CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let inner = &self.inner;
        DispatcherStats::bump(&inner.stats.received);

        let packet: CommandPacket = match codec::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                DispatcherStats::bump(&inner.stats.malformed);
                error!("Dropping malformed command packet: {}", e);
                return None;
            }
        };

        let Some(handler) = inner.handlers.get(&packet.cmd).cloned() else {
            DispatcherStats::bump(&inner.stats.unknown_commands);
            error!("{} not found!", packet.cmd);
            return None;
        };

        let permit = match inner.saturation {
            SaturationPolicy::Queue => None,
            SaturationPolicy::Block => {
                trace!("Waiting for a free slot before dispatching '{}'", packet.cmd);
                tokio::select! {
                    biased;

                    () = cancel_token.cancelled() => {
                        warn!("Shutdown while waiting for a slot, dropping '{}'", packet.cmd);
                        return None;
                    }

                    permit = Arc::clone(&inner.slots).acquire_owned() => Some(permit.ok()?),
                }
            }
            SaturationPolicy::Drop => {
                if let Ok(permit) = Arc::clone(&inner.slots).try_acquire_owned() {
                    Some(permit)
                } else {
                    DispatcherStats::bump(&inner.stats.saturated);
                    warn!("All slots busy, dropping '{}'", packet.cmd);
                    return None;
                }
            }
        };

        DispatcherStats::bump(&inner.stats.dispatched);
        let span = info_span!("dispatch", cmd = %packet.cmd);
        let inner = Arc::clone(inner);

        Some(tokio::spawn(
            async move {
                let Some(_permit) = inner.slot(permit).await else {
                    return;
                };
                inner.run_chain(packet, handler).await;
            }
            .instrument(span),
        ))
    }
}

impl<P, K> DispatcherInner<P, K>
where
    P: DatabasePool,
    K: CacheConnector,
{
    async fn slot(&self, permit: Option<OwnedSemaphorePermit>) -> Option<OwnedSemaphorePermit> {
        match permit {
            Some(permit) => Some(permit),
            None => Arc::clone(&self.slots).acquire_owned().await.ok(),
        }
    }

    async fn run_chain(
        &self,
        packet: CommandPacket,
        handler: SharedHandler<P::Connection, K::Connection>,
    ) {
        let mut db = match self.pool.acquire().await {
            Ok(db) => db,
            Err(e) => {
                DispatcherStats::bump(&self.stats.acquire_failures);
                error!("DB connection error: {}", e);
                return;
            }
        };

        let mut cache = match self.cache.connect().await {
            Ok(cache) => cache,
            Err(e) => {
                DispatcherStats::bump(&self.stats.acquire_failures);
                error!("Cache connection error: {}", e);
                self.pool.release(db).await;
                return;
            }
        };

        let args = packet.into_args();
        trace!(args = args.len(), "Invoking handler");

        let outcome = AssertUnwindSafe(handler.handle(&mut db, &mut cache, args))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => debug!("Handler finished"),
            Ok(Err(e)) => {
                DispatcherStats::bump(&self.stats.handler_failures);
                error!("Handler failed: {:#}", e);
            }
            Err(panic) => {
                DispatcherStats::bump(&self.stats.handler_failures);
                error!("Handler panicked: {}", panic_message(panic.as_ref()));
            }
        }

        self.cache.close(cache).await;
        self.pool.release(db).await;
        DispatcherStats::bump(&self.stats.completed);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Handle for a dispatcher started with [`Dispatcher::start`].
#[derive(Debug)]
pub struct DispatcherHandle {
    endpoint: Endpoint,
    stats: Arc<DispatcherStats>,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// The endpoint the pull socket is bound to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Shared dispatcher statistics.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    /// Request the receive loop to stop.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the dispatcher has been asked to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Waits for the receive loop to exit.
    pub async fn stopped(self) {
        if let Err(e) = self.task.await {
            error!("Dispatcher task ended abnormally: {}", e);
        }
    }
}
