//! NNTP Pool Facade: abstracts over multiple configured providers, keeping a
//! *posting* pool and a *check* pool (falling back to posting providers when
//! no check-only provider is configured). Not responsible for retry logic --
//! callers classify and retry a single attempt's outcome.

use crate::config::ServerConfig;
use crate::types::{Headers, PostOutcome};
use crate::wire_post::{WireConnectionManager, WireError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

struct Provider {
    name: String,
    /// Textual STAT/HEAD checks, and (indirectly) connection config for `wire`
    pool: nntp_rs::NntpPool,
    /// Raw-byte posting connections -- yEnc bodies are not valid UTF-8, so
    /// posting never goes through `nntp_rs::NntpClient::post`
    wire: bb8::Pool<WireConnectionManager>,
    degraded: std::sync::atomic::AtomicBool,
}

/// Point-in-time counters for observability.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSnapshot {
    /// Articles successfully posted across all providers
    pub articles_posted: u64,
    /// Bytes successfully posted across all providers
    pub bytes_posted: u64,
    /// Articles that failed after exhausting provider-level classification
    pub articles_failed: u64,
}

/// Result of a single `stat` against the check pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatResult {
    /// Article exists on the server
    Present,
    /// Article does not exist (yet, or expired)
    Missing,
    /// Server gave an ambiguous or unsupported response
    Unknown,
}

/// Multi-provider NNTP pool facade.
pub struct PoolFacade {
    posting: RwLock<Arc<Vec<Provider>>>,
    check: RwLock<Arc<Vec<Provider>>>,
    articles_posted: AtomicU64,
    bytes_posted: AtomicU64,
    articles_failed: AtomicU64,
}

impl PoolFacade {
    /// Build posting and check pools from the configured providers.
    pub async fn new(servers: &[ServerConfig]) -> crate::Result<Self> {
        let (posting, check) = Self::build_pools(servers).await?;

        Ok(Self {
            posting: RwLock::new(Arc::new(posting)),
            check: RwLock::new(Arc::new(check)),
            articles_posted: AtomicU64::new(0),
            bytes_posted: AtomicU64::new(0),
            articles_failed: AtomicU64::new(0),
        })
    }

    async fn build_pools(servers: &[ServerConfig]) -> crate::Result<(Vec<Provider>, Vec<Provider>)> {
        let mut posting = Vec::new();
        let mut check = Vec::new();

        for server in servers.iter().filter(|s| s.enabled) {
            let name = format!("{}:{}", server.host, server.port);
            let max_conns = server.max_connections;
            let nntp_config: nntp_rs::ServerConfig = server.clone().into();
            let pool = nntp_rs::NntpPool::new(nntp_config, max_conns)
                .await
                .map_err(|e| crate::Error::Fatal(format!("failed to build pool for {name}: {e}")))?;

            let wire = bb8::Pool::builder()
                .max_size(max_conns)
                .connection_timeout(std::time::Duration::from_secs(120))
                .idle_timeout(Some(std::time::Duration::from_secs(server.idle_timeout_s)))
                .build(WireConnectionManager::new(server.clone()))
                .await
                .map_err(|e| crate::Error::Fatal(format!("failed to build posting pool for {name}: {e}")))?;

            let provider = Provider {
                name: name.clone(),
                pool,
                wire,
                degraded: std::sync::atomic::AtomicBool::new(false),
            };

            if server.check_only {
                check.push(provider);
            } else if server.post {
                posting.push(provider);
            }
        }

        Ok((posting, check))
    }

    /// Rebuild posting and check pools from a fresh provider list (e.g.
    /// after a config reload) and atomically swap them in. Readers holding
    /// the old `Arc` finish their in-flight work against the old pools,
    /// which are dropped once the last clone goes away.
    pub async fn swap(&self, servers: &[ServerConfig]) -> crate::Result<()> {
        let (new_posting, new_check) = Self::build_pools(servers).await?;
        *self.posting.write().await = Arc::new(new_posting);
        *self.check.write().await = Arc::new(new_check);
        Ok(())
    }

    /// Post one article, trying posting providers in order and skipping
    /// providers already marked degraded unless none remain.
    pub async fn post_article(&self, headers: &Headers, body: &[u8]) -> (PostOutcome, Option<(String, String)>) {
        let providers = self.posting.read().await.clone();
        if providers.is_empty() {
            return (PostOutcome::Permanent, None);
        }

        let mut last_outcome = PostOutcome::Permanent;
        for provider in providers.iter() {
            if provider.degraded.load(Ordering::Relaxed) {
                continue;
            }

            match self.try_post(provider, headers, body).await {
                (PostOutcome::Ok, Some(id)) => {
                    self.articles_posted.fetch_add(1, Ordering::Relaxed);
                    self.bytes_posted.fetch_add(body.len() as u64, Ordering::Relaxed);
                    return (PostOutcome::Ok, Some((provider.name.clone(), id)));
                }
                (outcome @ (PostOutcome::Auth | PostOutcome::Quota), _) => {
                    provider.degraded.store(true, Ordering::Relaxed);
                    last_outcome = outcome;
                }
                (outcome, _) => {
                    last_outcome = outcome;
                }
            }
        }

        self.articles_failed.fetch_add(1, Ordering::Relaxed);
        (last_outcome, None)
    }

    async fn try_post(&self, provider: &Provider, headers: &Headers, body: &[u8]) -> (PostOutcome, Option<String>) {
        let mut conn = match provider.wire.get().await {
            Ok(conn) => conn,
            Err(_) => return (PostOutcome::Transient, None),
        };

        match conn.post_raw(headers, body).await {
            Ok(message_id) => (PostOutcome::Ok, Some(message_id)),
            Err(WireError::PostingNotPermitted) => (PostOutcome::Permanent, None),
            Err(WireError::AuthFailed(_)) => (PostOutcome::Auth, None),
            Err(WireError::Protocol { code: 480, .. }) => (PostOutcome::Auth, None),
            Err(WireError::Protocol { code: 452, .. }) => (PostOutcome::Quota, None),
            Err(WireError::Timeout) => (PostOutcome::Transient, None),
            Err(_) => (PostOutcome::Transient, None),
        }
    }

    /// Check whether a previously posted article is visible on the check
    /// pool (falling back to the posting pool when no check-only provider
    /// is configured), preferring `STAT` and falling back to `HEAD` when a
    /// provider doesn't give a clean answer.
    pub async fn stat_article(&self, message_id: &str) -> StatResult {
        let check = self.check.read().await.clone();
        let providers: Arc<Vec<Provider>> = if check.is_empty() {
            self.posting.read().await.clone()
        } else {
            check
        };

        for provider in providers.iter() {
            let mut conn = match provider.pool.get().await {
                Ok(conn) => conn,
                Err(_) => continue,
            };

            match conn.stat(message_id).await {
                Ok(_) => return StatResult::Present,
                Err(nntp_rs::NntpError::NoSuchArticle(_)) => return StatResult::Missing,
                Err(_) => match conn.fetch_head(message_id).await {
                    Ok(_) => return StatResult::Present,
                    Err(nntp_rs::NntpError::NoSuchArticle(_)) => return StatResult::Missing,
                    Err(_) => continue,
                },
            }
        }

        StatResult::Unknown
    }

    /// Snapshot of posting counters since process start.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            articles_posted: self.articles_posted.load(Ordering::Relaxed),
            bytes_posted: self.bytes_posted.load(Ordering::Relaxed),
            articles_failed: self.articles_failed.load(Ordering::Relaxed),
        }
    }
}
