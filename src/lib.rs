//! # postie
//!
//! Durable, multi-provider Usenet posting pipeline: takes a set of local
//! files, optionally generates PAR2 recovery data, segments and yEnc-encodes
//! them, posts the resulting articles across one or more NNTP providers with
//! retry and optional post-check verification, and assembles the result into
//! an NZB.
//!
//! ## Design Philosophy
//!
//! - **Durable** - jobs live in a SQLite-backed queue; a crash mid-job
//!   returns the job to pending rather than losing it
//! - **Multi-provider** - posting and post-check each draw from their own
//!   pool of configured providers, failing over on auth/quota errors
//! - **Library-first** - the CLI binary is a thin wrapper; [`Processor`]
//!   and the queue are usable directly by embedders
//!
//! ## Quick Start
//!
//! ```no_run
//! use postie::config::{Config, JobRequest};
//! use postie::db::Database;
//! use postie::par2::NoOpPar2Executor;
//! use postie::pausable::PausableContext;
//! use postie::pool::PoolFacade;
//! use postie::processor::Processor;
//! use postie::types::JobId;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: Config = serde_json::from_str(&std::fs::read_to_string("postie.json")?)?;
//!
//!     let queue = Database::new(&config.queue.db_path).await?;
//!     let pool = Arc::new(PoolFacade::new(&config.servers).await?);
//!     let processor = Processor::new(pool, Arc::new(NoOpPar2Executor), config, None);
//!
//!     let request = JobRequest { paths: vec!["movie.mkv".into()], priority: 0 };
//!     let outcome = processor.process(JobId::new(), &request, PausableContext::new()).await?;
//!     println!("wrote {:?}", outcome.nzb_path);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Durable queue persistence layer
pub mod db;
/// Error types
pub mod error;
/// Folder watching for the `watch` subcommand
pub mod folder_watcher;
/// NZB document assembly
pub mod nzb;
/// Filename/subject/date obfuscation policies
pub mod obfuscation;
/// PAR2 recovery file generation
pub mod par2;
/// Pause/cancel propagation
pub mod pausable;
/// Multi-provider NNTP pool facade
pub mod pool;
/// Job-level orchestration
pub mod processor;
/// Aggregate progress reporting
pub mod progress;
/// Retry backoff with jitter
pub mod retry;
/// Token-bucket upload speed limiting
pub mod speed_limiter;
/// Core types shared across the posting pipeline
pub mod types;
/// Raw wire posting, bypassing `nntp_rs`'s String-typed Article for binary bodies
pub mod wire_post;
/// yEnc encoding
pub mod yenc;

mod poster;

pub use error::{Error, Result};
pub use processor::{ProcessOutcome, Processor};

/// Wait for a termination signal, for use around the `watch` consumer loop.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        wait_for_signal_unix().await;
    }
    #[cfg(not(unix))]
    {
        wait_for_signal_fallback().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal_unix() {
    use tokio::signal::unix::{SignalKind, signal};

    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("received SIGINT");
            } else {
                tracing::error!("could not register any signal handlers, falling back to ctrl_c");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("received SIGTERM");
            } else {
                tracing::error!("could not register any signal handlers, falling back to ctrl_c");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal_fallback() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl+C"),
        Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl+C"),
    }
}
