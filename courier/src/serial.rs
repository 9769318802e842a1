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

//! In-order execution of fallible async tasks.
//!
//! Tasks are factories: each is called at most once per run to produce the
//! future for that step, and a step only starts after the previous one has
//! settled. Nothing runs concurrently. The slice is only borrowed, so the
//! same tasks can be run again.
//!
//! ```rust,ignore
//! let tasks: Vec<Box<dyn Fn() -> BoxFuture<'static, Result<u32, String>>>> = vec![
//!     Box::new(|| async { Ok(1) }.boxed()),
//!     Box::new(|| async { Err("nope".to_string()) }.boxed()),
//! ];
//! assert_eq!(serial(&tasks).await, Err("nope".to_string()));
//! assert_eq!(serial_lenient(&tasks).await, vec![1]);
//! ```

use std::fmt::Debug;
use std::future::Future;

use tracing::{debug, trace};

/// Runs `tasks` one after another, stopping at the first failure.
///
/// Returns every result in order, or the first error. Tasks after a failing
/// one are never started.
pub async fn serial<F, Fut, T, E>(tasks: &[F]) -> Result<Vec<T>, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut results = Vec::with_capacity(tasks.len());
    for (index, task) in tasks.iter().enumerate() {
        trace!(index, "Starting serial task");
        results.push(task().await?);
    }
    Ok(results)
}

/// Runs `tasks` one after another, skipping failures.
///
/// Returns the results of the tasks that succeeded, in their original order.
pub async fn serial_lenient<F, Fut, T, E>(tasks: &[F]) -> Vec<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Debug,
{
    let mut results = Vec::with_capacity(tasks.len());
    for (index, task) in tasks.iter().enumerate() {
        match task().await {
            Ok(value) => results.push(value),
            Err(e) => debug!(index, error = ?e, "Serial task failed, skipping"),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::future::{ready, BoxFuture, FutureExt};

    use super::*;

    type Task = Box<dyn Fn() -> BoxFuture<'static, Result<&'static str, &'static str>> + Send + Sync>;

    fn step(outcome: Result<&'static str, &'static str>, started: Arc<AtomicUsize>) -> Task {
        Box::new(move || {
            started.fetch_add(1, Ordering::SeqCst);
            ready(outcome).boxed()
        })
    }

    #[tokio::test]
    async fn test_empty() {
        let tasks: Vec<Task> = Vec::new();
        assert_eq!(serial(&tasks).await, Ok(Vec::new()));
        assert!(serial_lenient(&tasks).await.is_empty());
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let started = Arc::new(AtomicUsize::new(0));
        let tasks = vec![
            step(Ok("a"), Arc::clone(&started)),
            step(Ok("b"), Arc::clone(&started)),
        ];
        assert_eq!(serial(&tasks).await, Ok(vec!["a", "b"]));
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_strict_stops_at_first_failure() {
        let started = Arc::new(AtomicUsize::new(0));
        let tasks = vec![
            step(Err("first"), Arc::clone(&started)),
            step(Err("second"), Arc::clone(&started)),
        ];
        assert_eq!(serial(&tasks).await, Err("first"));
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lenient_all_fail() {
        let started = Arc::new(AtomicUsize::new(0));
        let tasks = vec![
            step(Err("x"), Arc::clone(&started)),
            step(Err("y"), Arc::clone(&started)),
        ];
        assert!(serial_lenient(&tasks).await.is_empty());
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tasks_can_run_again() {
        let started = Arc::new(AtomicUsize::new(0));
        let tasks = vec![step(Ok("a"), Arc::clone(&started))];
        assert_eq!(serial(&tasks).await, Ok(vec!["a"]));
        assert_eq!(serial(&tasks).await, Ok(vec!["a"]));
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }
}
