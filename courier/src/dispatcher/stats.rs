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

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for a running dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Frames taken off the pull endpoint.
    pub received: AtomicUsize,
    /// Packets handed to a dispatch chain.
    pub dispatched: AtomicUsize,
    /// Dispatch chains that reached handler invocation and cleaned up.
    pub completed: AtomicUsize,
    /// Packets naming an unregistered command.
    pub unknown_commands: AtomicUsize,
    /// Frames that did not decode as a command packet.
    pub malformed: AtomicUsize,
    /// Dispatches abandoned because a resource could not be acquired.
    pub acquire_failures: AtomicUsize,
    /// Handlers that returned an error or panicked.
    pub handler_failures: AtomicUsize,
    /// Packets dropped by the `drop` saturation policy.
    pub saturated: AtomicUsize,
}

impl DispatcherStats {
    /// Create new statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of frames received.
    #[must_use]
    pub fn received(&self) -> usize {
        self.received.load(Ordering::Relaxed)
    }

    /// Get the number of packets dispatched.
    #[must_use]
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Get the number of completed dispatches.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get the number of unknown commands.
    #[must_use]
    pub fn unknown_commands(&self) -> usize {
        self.unknown_commands.load(Ordering::Relaxed)
    }

    /// Get the number of malformed packets.
    #[must_use]
    pub fn malformed(&self) -> usize {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Get the number of acquisition failures.
    #[must_use]
    pub fn acquire_failures(&self) -> usize {
        self.acquire_failures.load(Ordering::Relaxed)
    }

    /// Get the number of failed handlers.
    #[must_use]
    pub fn handler_failures(&self) -> usize {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Get the number of packets dropped while saturated.
    #[must_use]
    pub fn saturated(&self) -> usize {
        self.saturated.load(Ordering::Relaxed)
    }

    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
