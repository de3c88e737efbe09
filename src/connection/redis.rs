use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::Connector;
use crate::error::Result;
use crate::storage::{RedisConfig, StorageError};

/// Opens Redis connections for the pool and probes them with `PING`.
pub struct RedisConnector {
    client: Client,
    connect_timeout: Duration,
}

impl RedisConnector {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.full_url()).map_err(|e| {
            StorageError::connection_with_source("Failed to create Redis client", Box::new(e))
        })?;
        Ok(Self {
            client,
            connect_timeout: config.connection_timeout,
        })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Connection = MultiplexedConnection;

    async fn connect(&self) -> Result<MultiplexedConnection> {
        let conn = timeout(
            self.connect_timeout,
            self.client.get_multiplexed_tokio_connection(),
        )
        .await
        .map_err(|_| StorageError::connection(format!(
            "Redis connect timed out after {}ms",
            self.connect_timeout.as_millis()
        )))?
        .map_err(|e| StorageError::connection_with_source("Failed to connect to Redis", Box::new(e)))?;

        debug!("Opened Redis connection");
        Ok(conn)
    }

    async fn check(&self, conn: &mut MultiplexedConnection) -> bool {
        let pong: RedisResult<String> = redis::cmd("PING").query_async(conn).await;
        pong.is_ok()
    }
}
