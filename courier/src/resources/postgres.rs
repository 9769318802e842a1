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
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Postgres;
use tracing::debug;

use super::DatabasePool;
use crate::config::DatabaseConfig;
use crate::error::ResourceError;

/// A [`DatabasePool`] over an `sqlx` PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgDatabasePool {
    pool: PgPool,
}

impl PgDatabasePool {
    /// Build a pool from configuration. Connections are opened on first use.
    #[must_use]
    pub fn connect_lazy(config: &DatabaseConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections.max(1))
            .idle_timeout(config.idle_timeout())
            .connect_lazy_with(options);

        debug!(
            host = %config.host,
            database = %config.database,
            max_connections = config.max_connections,
            "PostgreSQL pool configured"
        );
        Self { pool }
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying `sqlx` pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DatabasePool for PgDatabasePool {
    type Connection = PoolConnection<Postgres>;

    async fn acquire(&self) -> Result<Self::Connection, ResourceError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| ResourceError::Database(e.to_string()))
    }
}
