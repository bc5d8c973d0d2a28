//! Redis client
//!
//! `KeyValueClient` over `redis::aio::ConnectionManager`. The connection is
//! opened on first use, so building a client never touches the network.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::{ErrorKind, RedisError};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use super::KeyValueClient;
use crate::config::RedisEndpoint;
use crate::error::{ClientError, ClientResult, ConfigError};

/// Redis-backed `KeyValueClient` with async multiplexed connections and
/// automatic reconnection.
pub struct RedisClient {
    client: ::redis::Client,
    connection: OnceCell<ConnectionManager>,
    /// Connection URL with the password masked, for logs
    display_url: String,
}

impl fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisClient")
            .field("url", &self.display_url)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

impl RedisClient {
    /// Builds a client for `endpoint` without connecting.
    pub fn new(endpoint: &RedisEndpoint) -> Result<Self, ConfigError> {
        let url = connection_url(endpoint)?;
        let client = ::redis::Client::open(url.as_str()).map_err(|e| ConfigError::Client {
            engine: "redis",
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            display_url: redact_url(url.as_str()),
        })
    }

    async fn connection(&self) -> ClientResult<ConnectionManager> {
        self.connection
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| {
                        ClientError::Connection(format!("Failed to connect to Redis: {}", e))
                    })?;
                debug!(url = %self.display_url, "Redis connection established");
                Ok::<_, ClientError>(manager)
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl KeyValueClient for RedisClient {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let mut conn = self.connection().await?;
        ::redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("GET", e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> ClientResult<()> {
        let mut conn = self.connection().await?;
        ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| command_error("SET", e))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> ClientResult<bool> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("SET NX", e))?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> ClientResult<()> {
        let mut conn = self.connection().await?;
        ::redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| command_error("DEL", e))
    }

    async fn mget(&self, keys: &[String]) -> ClientResult<Vec<Option<String>>> {
        let mut conn = self.connection().await?;
        ::redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("MGET", e))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> ClientResult<i64> {
        let mut conn = self.connection().await?;
        ::redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("INCRBY", e))
    }

    async fn decr_by(&self, key: &str, delta: i64) -> ClientResult<i64> {
        let mut conn = self.connection().await?;
        ::redis::cmd("DECRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("DECRBY", e))
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> ClientResult<bool> {
        let mut conn = self.connection().await?;
        let updated: i64 = ::redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("EXPIRE", e))?;
        Ok(updated == 1)
    }

    async fn replace_hash(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl_secs: u64,
    ) -> ClientResult<()> {
        let mut conn = self.connection().await?;
        let mut pipe = ::redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        // HSET merges, so the DEL above is what clears stale fields
        if !fields.is_empty() {
            pipe.cmd("HSET").arg(key).arg(&fields).ignore();
            pipe.cmd("EXPIRE").arg(key).arg(ttl_secs).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| command_error("MULTI DEL/HSET/EXPIRE", e))
    }

    async fn get_hash(&self, key: &str) -> ClientResult<HashMap<String, String>> {
        let mut conn = self.connection().await?;
        ::redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("HGETALL", e))
    }

    async fn flush_db(&self) -> ClientResult<()> {
        let mut conn = self.connection().await?;
        ::redis::cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| command_error("FLUSHDB", e))
    }
}

/// Detail of the ERR reply to INCRBY/DECRBY on a non-integer value
const NOT_AN_INTEGER_REPLY: &str = "value is not an integer";

fn command_error(command: &str, err: RedisError) -> ClientError {
    let message = format!("Redis {} failed: {}", command, err);
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        ClientError::Connection(message)
    } else if err.kind() == ErrorKind::ResponseError
        && err.detail().is_some_and(|detail| detail.starts_with(NOT_AN_INTEGER_REPLY))
    {
        ClientError::NonNumeric(message)
    } else {
        ClientError::Backend(message)
    }
}

/// Builds `redis://` (or `rediss://` with TLS) for the endpoint, carrying the
/// password as percent-encoded userinfo.
pub(crate) fn connection_url(endpoint: &RedisEndpoint) -> Result<Url, ConfigError> {
    let scheme = if endpoint.tls { "rediss" } else { "redis" };
    let invalid = |reason: String| ConfigError::Client {
        engine: "redis",
        reason,
    };

    let mut url = Url::parse(&format!("{}://{}:{}", scheme, endpoint.host, endpoint.port))
        .map_err(|e| invalid(format!("invalid address {}:{}: {}", endpoint.host, endpoint.port, e)))?;
    if !endpoint.password.is_empty() {
        url.set_password(Some(&endpoint.password))
            .map_err(|_| invalid("password cannot be set on this address".to_string()))?;
    }
    Ok(url)
}

/// Redact credentials from a Redis URL for logging
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                // Cannot fail: the URL already carries credentials
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<invalid redis url>".to_string(),
    }
}
