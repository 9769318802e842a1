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

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use courier::codec::{self, Value};
use courier::config::{CourierConfig, SaturationPolicy, TransportConfig};
use courier::dispatcher::Dispatcher;
use courier::envelope::CommandPacket;
use courier::transport::PushSocket;
use tokio::time::timeout;

use crate::setup::*;

mod setup;

type TestDispatcher = Dispatcher<CountingPool, CountingCache>;

fn frame(packet: &CommandPacket) -> Vec<u8> {
    codec::encode(packet).expect("packet encodes")
}

fn recording_dispatcher(
    pool: CountingPool,
    cache: CountingCache,
) -> (TestDispatcher, tokio::sync::mpsc::UnboundedReceiver<Vec<Value>>) {
    let (handler, rx) = RecordingHandler::new();
    let mut builder = Dispatcher::builder(pool, cache);
    builder.register("record", handler);
    (builder.build(), rx)
}

fn loopback_transport() -> TransportConfig {
    TransportConfig {
        pull_address: "tcp://127.0.0.1:0".to_string(),
        ..TransportConfig::default()
    }
}

#[tokio::test]
async fn test_handler_receives_args_in_order() -> anyhow::Result<()> {
    initialize_tracing();
    let pool = CountingPool::new();
    let cache = CountingCache::new();
    let (dispatcher, mut rx) = recording_dispatcher(pool.clone(), cache.clone());

    let args = vec![Value::from(1), Value::from("two"), Value::from(true)];
    let chain = dispatcher
        .dispatch(&frame(&CommandPacket::with_args("record", args.clone())))
        .await
        .expect("known command is dispatched");
    chain.await?;

    assert_eq!(rx.recv().await, Some(args));
    assert_eq!(pool.ledger.opened(), 1);
    assert_eq!(pool.ledger.closed(), 1);
    assert_eq!(cache.ledger.opened(), 1);
    assert_eq!(cache.ledger.closed(), 1);

    let stats = dispatcher.stats();
    assert_eq!(stats.received(), 1);
    assert_eq!(stats.dispatched(), 1);
    assert_eq!(stats.completed(), 1);
    Ok(())
}

#[tokio::test]
async fn test_absent_args_become_empty() -> anyhow::Result<()> {
    initialize_tracing();
    let (dispatcher, mut rx) = recording_dispatcher(CountingPool::new(), CountingCache::new());

    let chain = dispatcher
        .dispatch(&frame(&CommandPacket::new("record")))
        .await
        .expect("known command is dispatched");
    chain.await?;

    assert_eq!(rx.recv().await, Some(Vec::new()));
    Ok(())
}

#[tokio::test]
async fn test_nil_args_become_empty() -> anyhow::Result<()> {
    initialize_tracing();
    let (dispatcher, mut rx) = recording_dispatcher(CountingPool::new(), CountingCache::new());

    let raw = codec::encode(&Value::Map(vec![
        (Value::from("cmd"), Value::from("record")),
        (Value::from("args"), Value::Nil),
    ]))?;
    let chain = dispatcher.dispatch(&raw).await.expect("known command is dispatched");
    chain.await?;

    assert_eq!(rx.recv().await, Some(Vec::new()));
    Ok(())
}

#[tokio::test]
async fn test_unknown_command_logs_once_and_skips_pool() -> anyhow::Result<()> {
    let errors = ErrorCounter::default();
    let _guard = errors.install();

    let pool = CountingPool::new();
    let cache = CountingCache::new();
    let (dispatcher, mut rx) = recording_dispatcher(pool.clone(), cache.clone());

    let outcome = dispatcher.dispatch(&frame(&CommandPacket::new("nope"))).await;

    assert!(outcome.is_none());
    assert_eq!(errors.count(), 1);
    assert_eq!(pool.ledger.opened(), 0);
    assert_eq!(cache.ledger.opened(), 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(dispatcher.stats().unknown_commands(), 1);
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_is_dropped() -> anyhow::Result<()> {
    initialize_tracing();
    let pool = CountingPool::new();
    let (dispatcher, _rx) = recording_dispatcher(pool.clone(), CountingCache::new());

    assert!(dispatcher.dispatch(&[0xc1, 0x00, 0xff]).await.is_none());
    assert!(dispatcher.dispatch(&codec::encode(&Value::from(5))?).await.is_none());

    assert_eq!(dispatcher.stats().malformed(), 2);
    assert_eq!(pool.ledger.opened(), 0);
    Ok(())
}

#[tokio::test]
async fn test_database_failure_skips_handler() -> anyhow::Result<()> {
    initialize_tracing();
    let cache = CountingCache::new();
    let (dispatcher, mut rx) = recording_dispatcher(CountingPool::failing(), cache.clone());

    let chain = dispatcher
        .dispatch(&frame(&CommandPacket::new("record")))
        .await
        .expect("known command is dispatched");
    chain.await?;

    assert!(rx.try_recv().is_err());
    assert_eq!(cache.ledger.opened(), 0);
    assert_eq!(dispatcher.stats().acquire_failures(), 1);
    assert_eq!(dispatcher.stats().completed(), 0);
    Ok(())
}

#[tokio::test]
async fn test_cache_failure_releases_database() -> anyhow::Result<()> {
    initialize_tracing();
    let pool = CountingPool::new();
    let (dispatcher, mut rx) = recording_dispatcher(pool.clone(), CountingCache::failing());

    let chain = dispatcher
        .dispatch(&frame(&CommandPacket::new("record")))
        .await
        .expect("known command is dispatched");
    chain.await?;

    assert!(rx.try_recv().is_err());
    assert_eq!(pool.ledger.opened(), 1);
    assert_eq!(pool.ledger.closed(), 1);
    assert_eq!(dispatcher.stats().acquire_failures(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failing_handler_still_cleans_up() -> anyhow::Result<()> {
    initialize_tracing();
    let pool = CountingPool::new();
    let cache = CountingCache::new();
    let mut builder = Dispatcher::builder(pool.clone(), cache.clone());
    builder.register("fail", FailingHandler);
    let dispatcher = builder.build();

    let chain = dispatcher
        .dispatch(&frame(&CommandPacket::new("fail")))
        .await
        .expect("known command is dispatched");
    chain.await?;

    assert_eq!(pool.ledger.closed(), 1);
    assert_eq!(cache.ledger.closed(), 1);
    assert_eq!(dispatcher.stats().handler_failures(), 1);
    assert_eq!(dispatcher.stats().completed(), 1);
    Ok(())
}

#[tokio::test]
async fn test_panicking_handler_still_cleans_up() -> anyhow::Result<()> {
    initialize_tracing();
    let pool = CountingPool::new();
    let cache = CountingCache::new();
    let mut builder = Dispatcher::builder(pool.clone(), cache.clone());
    builder.register("panic", PanickingHandler);
    let dispatcher = builder.build();

    let chain = dispatcher
        .dispatch(&frame(&CommandPacket::new("panic")))
        .await
        .expect("known command is dispatched");
    chain.await?;

    assert_eq!(pool.ledger.opened(), 1);
    assert_eq!(pool.ledger.closed(), 1);
    assert_eq!(cache.ledger.closed(), 1);
    assert_eq!(dispatcher.stats().handler_failures(), 1);
    Ok(())
}

#[tokio::test]
async fn test_last_registration_wins() -> anyhow::Result<()> {
    initialize_tracing();
    let (first, mut first_rx) = RecordingHandler::new();
    let (second, mut second_rx) = RecordingHandler::new();
    let mut builder = Dispatcher::builder(CountingPool::new(), CountingCache::new());
    builder.register("record", first).register("record", second);
    let dispatcher = builder.build();

    assert_eq!(dispatcher.commands().count(), 1);
    let chain = dispatcher
        .dispatch(&frame(&CommandPacket::new("record")))
        .await
        .expect("known command is dispatched");
    chain.await?;

    assert!(first_rx.try_recv().is_err());
    assert_eq!(second_rx.recv().await, Some(Vec::new()));
    Ok(())
}

#[tokio::test]
async fn test_queue_policy_caps_concurrency() -> anyhow::Result<()> {
    initialize_tracing();
    let pool = CountingPool::new();
    let handler = GatedHandler::new();
    let gate = Arc::clone(&handler.gate);
    let peak = Arc::clone(&handler.peak);

    let mut builder = Dispatcher::builder(pool.clone(), CountingCache::new());
    builder
        .register("gated", handler)
        .concurrency(1)
        .saturation(SaturationPolicy::Queue);
    let dispatcher = builder.build();

    let packet = frame(&CommandPacket::new("gated"));
    let first = dispatcher.dispatch(&packet).await.expect("dispatched");
    let second = dispatcher.dispatch(&packet).await.expect("dispatched");

    // Let both chains run as far as they can.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(pool.ledger.opened(), 1);

    gate.add_permits(2);
    first.await?;
    second.await?;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(pool.ledger.closed(), 2);
    Ok(())
}

#[tokio::test]
async fn test_drop_policy_discards_when_saturated() -> anyhow::Result<()> {
    initialize_tracing();
    let handler = GatedHandler::new();
    let gate = Arc::clone(&handler.gate);

    let mut builder = Dispatcher::builder(CountingPool::new(), CountingCache::new());
    builder
        .register("gated", handler)
        .concurrency(1)
        .saturation(SaturationPolicy::Drop);
    let dispatcher = builder.build();

    let packet = frame(&CommandPacket::new("gated"));
    let first = dispatcher.dispatch(&packet).await.expect("first fits");
    assert!(dispatcher.dispatch(&packet).await.is_none());
    assert_eq!(dispatcher.stats().saturated(), 1);

    gate.add_permits(1);
    first.await?;
    assert!(dispatcher.dispatch(&packet).await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_block_policy_waits_for_a_slot() -> anyhow::Result<()> {
    initialize_tracing();
    let handler = GatedHandler::new();
    let gate = Arc::clone(&handler.gate);

    let mut builder = Dispatcher::builder(CountingPool::new(), CountingCache::new());
    builder
        .register("gated", handler)
        .concurrency(1)
        .saturation(SaturationPolicy::Block);
    let dispatcher = builder.build();

    let packet = frame(&CommandPacket::new("gated"));
    let first = dispatcher.dispatch(&packet).await.expect("first fits");
    assert!(
        timeout(Duration::from_millis(50), dispatcher.dispatch(&packet))
            .await
            .is_err(),
        "dispatch should block while the only slot is held"
    );

    gate.add_permits(2);
    first.await?;
    let second = dispatcher.dispatch(&packet).await.expect("slot is free again");
    second.await?;
    Ok(())
}

#[tokio::test]
async fn test_configure_reads_pool_ceiling_and_policy() -> anyhow::Result<()> {
    initialize_tracing();
    let config = CourierConfig::from_toml_str(
        r#"
        [dispatch]
        saturation = "drop"

        [database]
        max_connections = 1
        "#,
    )?;
    let handler = GatedHandler::new();
    let gate = Arc::clone(&handler.gate);

    let mut builder = Dispatcher::builder(CountingPool::new(), CountingCache::new());
    builder.configure(&config).register("gated", handler);
    let dispatcher = builder.build();

    let packet = frame(&CommandPacket::new("gated"));
    let first = dispatcher.dispatch(&packet).await.expect("first fits");
    assert!(dispatcher.dispatch(&packet).await.is_none());

    gate.add_permits(1);
    first.await?;
    Ok(())
}

#[tokio::test]
async fn test_end_to_end_over_tcp() -> anyhow::Result<()> {
    initialize_tracing();
    let pool = CountingPool::new();
    let (dispatcher, mut rx) = recording_dispatcher(pool.clone(), CountingCache::new());

    let handle = dispatcher.start(&loopback_transport()).await?;

    let mut producer_a = PushSocket::connect(handle.endpoint()).await?;
    let mut producer_b = PushSocket::connect(handle.endpoint()).await?;
    producer_a
        .send(&CommandPacket::with_args("record", vec![Value::from("a")]))
        .await?;
    producer_b.send(&CommandPacket::new("unknown")).await?;
    producer_b
        .send(&CommandPacket::with_args("record", vec![Value::from("b")]))
        .await?;

    let mut seen = Vec::new();
    for _ in 0..2 {
        let args = timeout(Duration::from_secs(5), rx.recv())
            .await?
            .expect("handler channel open");
        seen.push(args);
    }
    seen.sort_by_key(|args| args.first().and_then(Value::as_str).map(str::to_owned));
    assert_eq!(seen, vec![vec![Value::from("a")], vec![Value::from("b")]]);

    handle.stop();
    assert!(handle.is_cancelled());
    let stats = handle.stats();
    timeout(Duration::from_secs(5), handle.stopped()).await?;

    assert_eq!(stats.unknown_commands(), 1);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_end_to_end_over_ipc() -> anyhow::Result<()> {
    initialize_tracing();
    let temp_dir = tempfile::TempDir::new()?;
    let socket_path = temp_dir.path().join("courier.sock");
    let (dispatcher, mut rx) = recording_dispatcher(CountingPool::new(), CountingCache::new());

    let transport = TransportConfig {
        pull_address: format!("ipc://{}", socket_path.display()),
        ..TransportConfig::default()
    };
    let handle = dispatcher.start(&transport).await?;
    assert!(socket_path.exists());

    let mut producer = PushSocket::connect(handle.endpoint()).await?;
    producer
        .send(&CommandPacket::with_args("record", vec![Value::from(7)]))
        .await?;

    let args = timeout(Duration::from_secs(5), rx.recv()).await?;
    assert_eq!(args, Some(vec![Value::from(7)]));

    handle.stop();
    timeout(Duration::from_secs(5), handle.stopped()).await?;
    Ok(())
}

#[tokio::test]
async fn test_stopped_dispatcher_ignores_new_packets() -> anyhow::Result<()> {
    initialize_tracing();
    let (dispatcher, mut rx) = recording_dispatcher(CountingPool::new(), CountingCache::new());
    let handle = dispatcher.start(&loopback_transport()).await?;
    let endpoint = handle.endpoint().clone();

    handle.stop();
    timeout(Duration::from_secs(5), handle.stopped()).await?;

    // The listener is gone once the loop exits; either the connect or the
    // delivery fails, and nothing reaches the handler.
    if let Ok(mut producer) = PushSocket::connect(&endpoint).await {
        let _ = producer.send(&CommandPacket::new("record")).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_stop_while_blocked_on_a_slot() -> anyhow::Result<()> {
    initialize_tracing();
    let handler = GatedHandler::new();
    let active = Arc::clone(&handler.active);

    let mut builder = Dispatcher::builder(CountingPool::new(), CountingCache::new());
    builder
        .register("gated", handler)
        .concurrency(1)
        .saturation(SaturationPolicy::Block);
    let dispatcher = builder.build();

    let handle = dispatcher.start(&loopback_transport()).await?;
    let stats = handle.stats();
    let mut producer = PushSocket::connect(handle.endpoint()).await?;
    producer.send(&CommandPacket::new("gated")).await?;
    producer.send(&CommandPacket::new("gated")).await?;

    // The first packet holds the only slot forever; the second leaves the
    // receive loop waiting for it.
    timeout(Duration::from_secs(5), async {
        while active.load(Ordering::SeqCst) == 0 || stats.received() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    handle.stop();
    timeout(Duration::from_secs(2), handle.stopped()).await?;

    assert_eq!(stats.dispatched(), 1);
    Ok(())
}
