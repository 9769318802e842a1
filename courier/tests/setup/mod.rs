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

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use courier::codec::Value;
use courier::envelope::CallContext;
use courier::error::{HandlerError, ResourceError};
use courier::prelude::{CacheConnector, CommandHandler, DatabasePool, ReplyHandler};
use tokio::sync::{mpsc, Semaphore};
use tracing::{Event, Level, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Ensures tracing initialization happens only once across all tests.
static INIT: Once = Once::new();

/// Initializes the global tracing subscriber for tests.
///
/// Events go to `logs/courier_tests.txt`. Tests that assert on logged errors
/// install an [`ErrorCounter`] as their thread default instead.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        let file_appender = RollingFileAppender::new(Rotation::NEVER, "logs", "courier_tests.txt");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leak the guard so the non-blocking writer is not dropped before process exit
        Box::leak(Box::new(guard));

        let filter = EnvFilter::new("trace")
            .add_directive("courier=trace".parse().unwrap())
            .add_directive("tokio=info".parse().unwrap());

        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::TRACE)
            .compact()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
    });
}

/// Counts `ERROR` events.
#[derive(Clone, Default)]
pub struct ErrorCounter(Arc<AtomicUsize>);

impl ErrorCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Installs a subscriber that only counts errors as this thread's default.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        use tracing_subscriber::layer::SubscriberExt;
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A stand-in connection handed out by the counting resources.
#[derive(Debug)]
pub struct TestConnection {
    pub id: usize,
}

/// Acquire/release bookkeeping shared by a resource and its clones.
#[derive(Debug, Default)]
pub struct Ledger {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl Ledger {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A [`DatabasePool`] that records every acquire and release.
#[derive(Clone, Default)]
pub struct CountingPool {
    pub ledger: Arc<Ledger>,
    fail: bool,
}

impl CountingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool whose `acquire` always fails.
    pub fn failing() -> Self {
        Self {
            ledger: Arc::default(),
            fail: true,
        }
    }
}

#[async_trait]
impl DatabasePool for CountingPool {
    type Connection = TestConnection;

    async fn acquire(&self) -> Result<Self::Connection, ResourceError> {
        if self.fail {
            return Err(ResourceError::Database("connection refused".to_string()));
        }
        let id = self.ledger.opened.fetch_add(1, Ordering::SeqCst);
        Ok(TestConnection { id })
    }

    async fn release(&self, _connection: Self::Connection) {
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A [`CacheConnector`] that records every connect and close.
#[derive(Clone, Default)]
pub struct CountingCache {
    pub ledger: Arc<Ledger>,
    fail: bool,
}

impl CountingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose `connect` always fails.
    pub fn failing() -> Self {
        Self {
            ledger: Arc::default(),
            fail: true,
        }
    }
}

#[async_trait]
impl CacheConnector for CountingCache {
    type Connection = TestConnection;

    async fn connect(&self) -> Result<Self::Connection, ResourceError> {
        if self.fail {
            return Err(ResourceError::Cache("cache unreachable".to_string()));
        }
        let id = self.ledger.opened.fetch_add(1, Ordering::SeqCst);
        Ok(TestConnection { id })
    }

    async fn close(&self, _connection: Self::Connection) {
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Forwards the arguments of every invocation to a channel.
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<Vec<Value>>,
}

impl RecordingHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<Value>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CommandHandler<TestConnection, TestConnection> for RecordingHandler {
    async fn handle(
        &self,
        _db: &mut TestConnection,
        _cache: &mut TestConnection,
        args: Vec<Value>,
    ) -> Result<(), HandlerError> {
        self.tx.send(args)?;
        Ok(())
    }
}

/// Always fails.
pub struct FailingHandler;

#[async_trait]
impl CommandHandler<TestConnection, TestConnection> for FailingHandler {
    async fn handle(
        &self,
        _db: &mut TestConnection,
        _cache: &mut TestConnection,
        _args: Vec<Value>,
    ) -> Result<(), HandlerError> {
        Err(anyhow::anyhow!("boom"))
    }
}

/// Always panics.
pub struct PanickingHandler;

#[async_trait]
impl CommandHandler<TestConnection, TestConnection> for PanickingHandler {
    async fn handle(
        &self,
        _db: &mut TestConnection,
        _cache: &mut TestConnection,
        _args: Vec<Value>,
    ) -> Result<(), HandlerError> {
        panic!("handler exploded");
    }
}

/// Waits for a permit on `gate` before finishing, tracking how many
/// invocations are in flight at once.
pub struct GatedHandler {
    pub gate: Arc<Semaphore>,
    pub active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl GatedHandler {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            active: Arc::default(),
            peak: Arc::default(),
        }
    }
}

#[async_trait]
impl CommandHandler<TestConnection, TestConnection> for GatedHandler {
    async fn handle(
        &self,
        _db: &mut TestConnection,
        _cache: &mut TestConnection,
        _args: Vec<Value>,
    ) -> Result<(), HandlerError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let permit = self.gate.acquire().await?;
        permit.forget();
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Answers `echo` with its arguments and `whoami` with the caller context.
pub struct EchoReplyHandler;

#[async_trait]
impl ReplyHandler for EchoReplyHandler {
    async fn reply(&self, ctx: &CallContext, fun: &str, args: Vec<Value>) -> Result<Value, HandlerError> {
        match fun {
            "echo" => Ok(Value::Array(args)),
            "whoami" => Ok(Value::Array(vec![
                Value::from(ctx.domain.as_str()),
                Value::from(ctx.address.as_str()),
                Value::from(ctx.uid.as_str()),
            ])),
            "repeat" => {
                let count = args.first().and_then(Value::as_u64).unwrap_or(0);
                Ok(Value::from("x".repeat(usize::try_from(count)?)))
            }
            other => Err(anyhow::anyhow!("unknown function {other}")),
        }
    }
}
