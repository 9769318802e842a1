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

//! Socket transports for the two messaging patterns.
//!
//! * **Push/pull**: fire-and-forget delivery of command packets from any
//!   number of producers ([`PushSocket`]) to one bound consumer
//!   ([`PullSocket`]). At-most-once, no acknowledgement, no reply path.
//! * **Request/reply**: one request and at most one response per connection
//!   ([`RequestSocket`] on the calling side, [`ReplySocket`] on the answering
//!   side). Connections are never reused.
//!
//! Both run over TCP (`tcp://host:port`) or Unix domain sockets
//! (`ipc:///path`) and share the length-prefixed framing in [`frame`].

// --- Public Re-exports ---
pub use address::Endpoint;
pub use socket::{PullSocket, PullStats, PushSocket, ReplyExchange, ReplySocket, RequestSocket};

// --- Submodules ---

/// Endpoint address parsing.
mod address;

/// Wire framing for every frame on every socket.
pub mod frame;

/// Socket implementations.
mod socket;
