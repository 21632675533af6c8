//! # Herald
//!
//! Publishes one software release to many independent remote targets from a
//! single `.herald.toml`: chat webhooks, plain file stores, and staged package
//! repositories. Any target may be slow, flaky, or stateful; a declared
//! failure in one never stops the others.
//!
//! ## Pipeline
//!
//! A full release runs **sign → deploy → upload → announce**:
//!
//! 1. [`signing::sign_all`] writes a detached signature per artifact plus a
//!    `checksums.sha256` manifest, after [`signing::load_signing_key`] has
//!    unlocked the release key.
//! 2. [`engine::Engine::run`] dispatches each category. Providers run one at
//!    a time in name order, wrapped in BEFORE/SUCCESS/FAILURE
//!    [`lifecycle`] events.
//! 3. Staged deployers drive the [`staging`] state machine: create a staging
//!    repository, upload, close, release, polling the remote between phases.
//! 4. Uploads stream through an [`stream::UploadStreamGuard`] so a transient
//!    failure can be retried without re-opening the file.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use herald::{context, pipeline, providers};
//!
//! let config = herald_config::load_config(Path::new("."))?;
//! let ctx = pipeline::context_for(&config, Path::new("."), Box::new(context::NullReporter));
//! let registry = providers::builtin_registry();
//! let report = pipeline::run_release(&config, &registry, &pipeline::default_bus(&ctx), &ctx, &[], &[])?;
//! println!("{} provider(s) failed", report.failed().len());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`context`]: Execution context, logger prefix stack, `Reporter` sink
//! - [`engine`]: Provider trait, registry, dispatch
//! - [`lifecycle`]: Event bus and listeners
//! - [`staging`]: Staged repository state machine and REST client
//! - [`signing`]: Keyring, detached signatures, checksums
//! - [`stream`]: Bounded mark/replay stream for retryable uploads
//! - [`providers`]: Built-in webhook, HTTP, and staged providers
//! - [`pipeline`]: Full release orchestration

/// Execution context shared by every provider.
pub mod context;

/// Provider discovery, filtering, and isolated invocation.
pub mod engine;

/// Typed failures raised by providers, signing, and listeners.
pub mod error;

/// Lifecycle event bus and the built-in JSONL listener.
pub mod lifecycle;

/// Full release orchestration.
pub mod pipeline;

/// Built-in providers.
pub mod providers;

/// Detached artifact signatures.
pub mod signing;

/// Staged repository deployment.
pub mod staging;

/// Bounded-memory mark/replay stream.
pub mod stream;

/// Shared HTTP upload helper.
mod transfer;

/// Configurable retry strategies with backoff and jitter.
/// Re-exported from herald-retry microcrate.
pub use herald_retry as retry;

/// Domain types shared across herald crates.
pub use herald_types as types;

#[cfg(test)]
mod test_support;
