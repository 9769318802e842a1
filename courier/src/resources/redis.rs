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

use async_trait::async_trait;
use ::redis::aio::MultiplexedConnection;
use ::redis::Client;

use super::CacheConnector;
use crate::config::CacheConfig;
use crate::error::ResourceError;

/// A [`CacheConnector`] that opens a fresh Redis connection per dispatch.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    client: Client,
}

impl RedisConnector {
    /// Build a connector from configuration.
    pub fn open(config: &CacheConfig) -> Result<Self, ResourceError> {
        let url = format!("redis://{}:{}/", config.host, config.port());
        let client = Client::open(url).map_err(|e| ResourceError::Cache(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CacheConnector for RedisConnector {
    type Connection = MultiplexedConnection;

    async fn connect(&self) -> Result<Self::Connection, ResourceError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ResourceError::Cache(e.to_string()))
    }
}
