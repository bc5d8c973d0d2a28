//! Memcached client
//!
//! `DistributedCacheClient` over the synchronous `memcache` crate. Every call
//! runs on the blocking pool with a clone of the client.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use memcache::{CommandError, MemcacheError};
use tokio::sync::OnceCell;
use tracing::debug;

use super::DistributedCacheClient;
use crate::error::{ClientError, ClientResult, ConfigError};

/// Reply text memcached sends for incr/decr on a non-numeric value
const NON_NUMERIC_REPLY: &str = "cannot increment or decrement non-numeric value";

/// How a memcached reply that the crate reports as an error should be read.
#[derive(Debug, PartialEq, Eq)]
enum Failure {
    /// NOT_FOUND
    Missing,
    /// NOT_STORED / EXISTS
    NotStored,
    /// incr/decr on a value that is not a decimal number
    NonNumeric,
    Other,
}

fn classify(err: &MemcacheError) -> Failure {
    match err {
        MemcacheError::CommandError(CommandError::KeyNotFound) => Failure::Missing,
        MemcacheError::CommandError(CommandError::KeyExists) => Failure::NotStored,
        // The text protocol reports this as a CLIENT_ERROR reply line
        MemcacheError::ClientError(reply)
            if format!("{:?}", reply).contains(NON_NUMERIC_REPLY) =>
        {
            Failure::NonNumeric
        }
        _ => Failure::Other,
    }
}

fn command_error(command: &str, err: MemcacheError) -> ClientError {
    let message = format!("Memcached {} failed: {}", command, err);
    match classify(&err) {
        Failure::NonNumeric => ClientError::NonNumeric(message),
        _ => match err {
            MemcacheError::IOError(_) => ClientError::Connection(message),
            _ => ClientError::Backend(message),
        },
    }
}

/// Memcached-backed `DistributedCacheClient`. Keys are spread over the
/// configured servers by the underlying client.
pub struct MemcachedClient {
    urls: Vec<String>,
    client: OnceCell<memcache::Client>,
}

impl fmt::Debug for MemcachedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcachedClient")
            .field("servers", &self.urls)
            .field("connected", &self.client.initialized())
            .finish()
    }
}

impl MemcachedClient {
    /// Builds a client for `servers` (`host:port` or `memcache://` URLs)
    /// without connecting.
    pub fn new(servers: &[String]) -> Result<Self, ConfigError> {
        let urls: Vec<String> = servers.iter().map(|server| server_url(server)).collect();
        if urls.is_empty() {
            return Err(ConfigError::MissingParameter {
                engine: "memcached",
                parameter: "servers",
            });
        }
        Ok(Self {
            urls,
            client: OnceCell::new(),
        })
    }

    async fn client(&self) -> ClientResult<memcache::Client> {
        self.client
            .get_or_try_init(|| async {
                let urls = self.urls.clone();
                let client = tokio::task::spawn_blocking(move || memcache::Client::connect(urls))
                    .await
                    .map_err(|e| ClientError::Connection(format!("Memcached connect task failed: {}", e)))?
                    .map_err(|e| {
                        ClientError::Connection(format!("Failed to connect to Memcached: {}", e))
                    })?;
                debug!(servers = ?self.urls, "Memcached connection established");
                Ok::<_, ClientError>(client)
            })
            .await
            .cloned()
    }

    /// Runs `op` against a clone of the client on the blocking pool.
    async fn run<T, F>(&self, command: &'static str, op: F) -> ClientResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, MemcacheError> + Send + 'static,
    {
        let client = self.client().await?;
        tokio::task::spawn_blocking(move || op(&client))
            .await
            .map_err(|e| ClientError::Backend(format!("Memcached {} task failed: {}", command, e)))?
            .map_err(|e| command_error(command, e))
    }

    /// Like `run`, but reports the given reply kind as `Ok(None)`.
    async fn run_tolerating<T, F>(
        &self,
        command: &'static str,
        tolerated: Failure,
        op: F,
    ) -> ClientResult<Option<T>>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, MemcacheError> + Send + 'static,
    {
        let client = self.client().await?;
        let outcome = tokio::task::spawn_blocking(move || op(&client))
            .await
            .map_err(|e| ClientError::Backend(format!("Memcached {} task failed: {}", command, e)))?;

        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(e) if classify(&e) == tolerated => Ok(None),
            Err(e) => Err(command_error(command, e)),
        }
    }
}

/// Accepts bare `host:port` entries as well as full URLs.
fn server_url(server: &str) -> String {
    let server = server.trim();
    if server.contains("://") {
        server.to_string()
    } else {
        format!("memcache://{}", server)
    }
}

#[async_trait]
impl DistributedCacheClient for MemcachedClient {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let key = key.to_string();
        self.run("get", move |client| client.get::<String>(&key)).await
    }

    async fn get_multi(&self, keys: &[String]) -> ClientResult<HashMap<String, String>> {
        let keys = keys.to_vec();
        self.run("gets", move |client| {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            client.gets::<String>(&refs)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, expiration: u32) -> ClientResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.run("set", move |client| client.set(&key, value.as_str(), expiration))
            .await
    }

    async fn add(&self, key: &str, value: &str, expiration: u32) -> ClientResult<bool> {
        let (key, value) = (key.to_string(), value.to_string());
        let stored = self
            .run_tolerating("add", Failure::NotStored, move |client| {
                client.add(&key, value.as_str(), expiration)
            })
            .await?;
        Ok(stored.is_some())
    }

    async fn delete(&self, key: &str) -> ClientResult<bool> {
        let key = key.to_string();
        let deleted = self
            .run_tolerating("delete", Failure::Missing, move |client| client.delete(&key))
            .await?;
        Ok(deleted.unwrap_or(false))
    }

    async fn incr(&self, key: &str, delta: u64) -> ClientResult<Option<u64>> {
        let key = key.to_string();
        self.run_tolerating("incr", Failure::Missing, move |client| {
            client.increment(&key, delta)
        })
        .await
    }

    async fn decr(&self, key: &str, delta: u64) -> ClientResult<Option<u64>> {
        let key = key.to_string();
        self.run_tolerating("decr", Failure::Missing, move |client| {
            client.decrement(&key, delta)
        })
        .await
    }

    async fn touch(&self, key: &str, expiration: u32) -> ClientResult<bool> {
        let key = key.to_string();
        let touched = self
            .run_tolerating("touch", Failure::Missing, move |client| {
                client.touch(&key, expiration)
            })
            .await?;
        Ok(touched.unwrap_or(false))
    }

    async fn flush(&self) -> ClientResult<()> {
        self.run("flush_all", |client| client.flush()).await
    }
}
