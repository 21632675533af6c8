//! Full release orchestration: sign, then deploy, upload and announce.

use std::path::Path;

use anyhow::{Context, Result};
use herald_config::Config;
use herald_events::events_path;
use herald_types::{ArtifactSignature, Category};

use crate::context::{ExecutionContext, Reporter};
use crate::engine::{Engine, ProviderRegistry, RunSummary};
use crate::lifecycle::{EventBus, EventLogListener};
use crate::signing;

/// Outcome of [`run_release`].
#[derive(Debug)]
pub struct ReleaseReport {
    pub signatures: Vec<ArtifactSignature>,
    pub summaries: Vec<RunSummary>,
}

impl ReleaseReport {
    /// `(category, provider)` for every provider that reported a declared failure.
    pub fn failed(&self) -> Vec<(Category, &str)> {
        self.summaries
            .iter()
            .flat_map(|s| s.failed().into_iter().map(move |name| (s.category, name)))
            .collect()
    }
}

/// Build the execution context a configuration describes.
pub fn context_for(config: &Config, base_dir: &Path, reporter: Box<dyn Reporter>) -> ExecutionContext {
    ExecutionContext::new(
        config.project_info(),
        base_dir,
        config.output_dir(base_dir),
        reporter,
    )
    .with_dry_run(config.release.dry_run)
    .with_artifacts(config.project.artifacts.iter().cloned())
}

/// Event bus with the built-in `events.jsonl` listener.
pub fn default_bus(ctx: &ExecutionContext) -> EventBus {
    EventBus::new().with_listener(Box::new(EventLogListener::new(events_path(ctx.output_dir()))))
}

/// Sign every project artifact.
///
/// The key is unlocked first, even on a dry run, so a bad passphrase is
/// caught before anything else happens.
pub fn run_signing(config: &Config, ctx: &ExecutionContext) -> Result<Vec<ArtifactSignature>> {
    let logger = ctx.logger();
    let _scope = logger.push_prefix("sign");
    let signing_config = &config.signing;
    if !signing_config.enabled {
        logger.debug("signing disabled");
        return Ok(Vec::new());
    }

    let keyring = signing_config
        .keyring
        .as_ref()
        .map(|p| ctx.base_dir().join(p))
        .context("[signing] keyring is required when signing is enabled")?;
    let key = signing::load_signing_key(
        &keyring,
        signing_config.key_id.as_deref(),
        &signing_config.passphrase_source(),
    )
    .with_context(|| format!("failed to load signing key from {}", keyring.display()))?;
    logger.info(&format!("using key {} ({})", key.id(), key.public_key_hex()));

    if ctx.artifacts().is_empty() {
        logger.info("no artifacts to sign");
        return Ok(Vec::new());
    }

    let output_dir = ctx.signatures_dir();
    let signatures = ctx.perform(
        &format!(
            "signing {} artifact(s) into {}",
            ctx.artifacts().len(),
            output_dir.display()
        ),
        || signing::sign_all(ctx.artifacts(), &key, signing_config.armored, &output_dir),
    )?;
    Ok(signatures.unwrap_or_default())
}

/// Run a full release: sign, then every category in [`Category::RELEASE_ORDER`].
///
/// `include` and `exclude` apply to every category. Declared provider
/// failures are collected in the report; only fatal errors are returned.
pub fn run_release(
    config: &Config,
    registry: &ProviderRegistry,
    bus: &EventBus,
    ctx: &ExecutionContext,
    include: &[String],
    exclude: &[String],
) -> Result<ReleaseReport> {
    let project = ctx.project();
    ctx.logger().info(&format!(
        "releasing {} {}{}",
        project.name,
        project.version,
        if ctx.dry_run() { " (dry run)" } else { "" }
    ));

    let signatures = run_signing(config, ctx)?;
    let engine = Engine::new(config, registry, bus);
    let mut summaries = Vec::with_capacity(Category::RELEASE_ORDER.len());
    for category in Category::RELEASE_ORDER {
        summaries.push(engine.run(category, include, exclude, ctx)?);
    }

    let report = ReleaseReport {
        signatures,
        summaries,
    };
    let failed = report.failed();
    let ran: usize = report.summaries.iter().map(|s| s.ran.len()).sum();
    if failed.is_empty() {
        ctx.logger()
            .info(&format!("release finished: {ran} provider(s) ran"));
    } else {
        ctx.logger().warn(&format!(
            "release finished: {ran} provider(s) ran, {} failed ({})",
            failed.len(),
            failed
                .iter()
                .map(|(c, n)| format!("{c}.{n}"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    Ok(report)
}
