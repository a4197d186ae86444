//! Resilient cache façade.
//!
//! [`ResilientCache`] wraps a [`RemoteCache`] client behind a circuit breaker
//! and a bounded [`FallbackStore`], so a flaky cache backend degrades into
//! fallback reads instead of cascading into request failures. Writes still
//! surface remote errors to the caller, who decides whether eventual
//! consistency is acceptable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::cmd;
use deadpool_redis::Pool;
use thiserror::Error;
use tracing::warn;

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::fallback::{FallbackStats, FallbackStore};

/// Default TTL for values mirrored into the fallback store after a remote
/// read, and for writes with no explicit TTL. Seven days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors from the remote cache client.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache command error: {0}")]
    Command(String),
}

/// Errors surfaced by [`ResilientCache`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// Breaker disallows remote calls and the fallback has no copy.
    #[error("circuit breaker open and key not in fallback")]
    BreakerOpen,

    /// Key absent both remotely and in the fallback.
    #[error("key not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// The remote cache wire contract.
///
/// `get` distinguishes "key absent" (`Ok(None)`) from a transport or server
/// failure (`Err`); only the latter counts against the circuit breaker.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RemoteError>;
    async fn delete(&self, key: &str) -> Result<(), RemoteError>;
}

/// Redis-backed [`RemoteCache`] over a deadpool connection pool.
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, RemoteError> {
        self.pool
            .get()
            .await
            .map_err(|e| RemoteError::Connection(e.to_string()))
    }
}

#[async_trait]
impl RemoteCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut conn = self.conn().await?;
        let data: Option<Vec<u8>> = cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| RemoteError::Command(e.to_string()))?;
        Ok(data)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RemoteError> {
        let mut conn = self.conn().await?;
        cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| RemoteError::Command(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        let mut conn = self.conn().await?;
        cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| RemoteError::Command(e.to_string()))
    }
}

/// Combined breaker + fallback diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub breaker: BreakerSnapshot,
    pub fallback: FallbackStats,
}

/// Get/set/delete façade over remote cache, breaker and fallback store.
pub struct ResilientCache {
    remote: Arc<dyn RemoteCache>,
    breaker: CircuitBreaker,
    fallback: Arc<FallbackStore>,
}

impl ResilientCache {
    pub fn new(
        remote: Arc<dyn RemoteCache>,
        breaker: CircuitBreaker,
        fallback: Arc<FallbackStore>,
    ) -> Self {
        Self {
            remote,
            breaker,
            fallback,
        }
    }

    /// Read a value, preferring the remote cache while the breaker allows it.
    ///
    /// Remote errors fall back to the local store; the original error is only
    /// surfaced when the fallback has no copy either. A remote "key absent"
    /// response is not a reliability failure and never trips the breaker.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        if !self.breaker.allow() {
            return self.fallback.get(key).ok_or(CacheError::BreakerOpen);
        }

        match self.remote.get(key).await {
            Ok(Some(data)) => {
                self.breaker.record_success();
                self.fallback.set(key, data.clone(), DEFAULT_TTL);
                Ok(data)
            }
            Ok(None) => match self.fallback.get(key) {
                Some(data) => Ok(data),
                None => Err(CacheError::NotFound(key.to_string())),
            },
            Err(e) => {
                if self.breaker.record_failure() {
                    warn!(error = %e, "cache circuit breaker opened");
                }
                match self.fallback.get(key) {
                    Some(data) => Ok(data),
                    None => Err(e.into()),
                }
            }
        }
    }

    /// Write a value. The fallback store always receives the value first; the
    /// remote write is skipped while the breaker is open (the fallback already
    /// holds the value), and a remote failure is still reported to the caller.
    pub async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or(DEFAULT_TTL);

        self.fallback.set(key, value.clone(), ttl);

        if !self.breaker.allow() {
            return Ok(());
        }

        match self.remote.set(key, &value, ttl).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                if self.breaker.record_failure() {
                    warn!(error = %e, "cache circuit breaker opened");
                }
                Err(e.into())
            }
        }
    }

    /// Delete a key from both stores; the remote delete is skipped while the
    /// breaker is open.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.fallback.delete(key);

        if !self.breaker.allow() {
            return Ok(());
        }

        match self.remote.delete(key).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                if self.breaker.record_failure() {
                    warn!(error = %e, "cache circuit breaker opened");
                }
                Err(e.into())
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            breaker: self.breaker.snapshot(),
            fallback: self.fallback.stats(),
        }
    }
}
