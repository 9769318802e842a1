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

//! Endpoint addresses in `scheme://target` form.

use std::fmt;
use std::str::FromStr;

#[cfg(unix)]
use std::path::PathBuf;

use crate::error::TransportError;

/// A transport endpoint.
///
/// * `tcp://host:port`: a TCP socket.
/// * `ipc:///path/to/socket`: a Unix domain socket (Unix only).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP endpoint; holds `host:port`.
    Tcp(String),
    /// Unix domain socket endpoint; holds the socket path.
    #[cfg(unix)]
    Ipc(PathBuf),
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(target) = s.strip_prefix("tcp://") {
            let valid = target
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                return Err(TransportError::InvalidAddress(format!(
                    "{s}: expected tcp://host:port"
                )));
            }
            return Ok(Self::Tcp(target.to_string()));
        }

        #[cfg(unix)]
        if let Some(path) = s.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(TransportError::InvalidAddress(format!(
                    "{s}: missing socket path"
                )));
            }
            return Ok(Self::Ipc(PathBuf::from(path)));
        }

        Err(TransportError::InvalidAddress(format!(
            "{s}: unsupported scheme"
        )))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(target) => write!(f, "tcp://{target}"),
            #[cfg(unix)]
            Self::Ipc(path) => write!(f, "ipc://{}", path.display()),
        }
    }
}
