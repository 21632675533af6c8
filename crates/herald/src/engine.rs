//! Provider dispatch.
//!
//! Providers are built from configuration through an explicit
//! [`ProviderRegistry`] of factories keyed by the entry's `type`. Within a
//! category they run one at a time in name order. Each invocation is isolated:
//! a declared [`ProviderError`](crate::error::ProviderError) becomes a warning
//! and a FAILURE event, and the next provider still runs. Anything else aborts
//! the run.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use herald_config::{Config, ProviderEntry};
use herald_types::{Category, Outcome, ProviderDescriptor};

use crate::context::ExecutionContext;
use crate::error::StepError;
use crate::lifecycle::{EventBus, LifecycleEvent};

/// One configured integration with a remote target.
pub trait Provider {
    fn name(&self) -> &str;
    fn category(&self) -> Category;
    fn is_enabled(&self) -> bool;
    fn is_snapshot_supported(&self) -> bool;
    fn execute(&self, ctx: &ExecutionContext) -> Result<(), StepError>;
}

/// Builds a provider from its resolved descriptor and raw entry.
pub type ProviderFactory =
    Box<dyn Fn(ProviderDescriptor, &ProviderEntry) -> Result<Box<dyn Provider>>>;

#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `kind`, replacing any previous one.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(ProviderDescriptor, &ProviderEntry) -> Result<Box<dyn Provider>> + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(
        &self,
        category: Category,
        name: &str,
        entry: &ProviderEntry,
    ) -> Result<Box<dyn Provider>> {
        let factory = self.factories.get(&entry.kind).ok_or_else(|| {
            anyhow!(
                "[{category}.{name}] has unknown type '{}' (known: {})",
                entry.kind,
                self.kinds().collect::<Vec<_>>().join(", ")
            )
        })?;
        factory(entry.descriptor(category, name), entry)
            .with_context(|| format!("failed to set up {category} provider {name}"))
    }
}

/// Enabled iff toggled on and, for a snapshot, the provider supports snapshots.
pub fn resolve_enabled(provider: &dyn Provider, project_is_snapshot: bool) -> bool {
    provider.is_enabled() && (!project_is_snapshot || provider.is_snapshot_supported())
}

/// What a category run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub category: Category,
    /// Providers invoked, in order, with their outcome.
    pub ran: Vec<(String, Outcome)>,
    /// Providers skipped as disabled, excluded, or not selected.
    pub skipped: Vec<String>,
}

impl RunSummary {
    fn new(category: Category) -> Self {
        Self {
            category,
            ran: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn any_ran(&self) -> bool {
        !self.ran.is_empty()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.ran
            .iter()
            .filter(|(_, outcome)| *outcome == Outcome::RanFailed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

pub struct Engine<'a> {
    config: &'a Config,
    registry: &'a ProviderRegistry,
    bus: &'a EventBus,
}

impl<'a> Engine<'a> {
    pub fn new(config: &'a Config, registry: &'a ProviderRegistry, bus: &'a EventBus) -> Self {
        Self {
            config,
            registry,
            bus,
        }
    }

    /// Every declared provider of `category`, sorted by name.
    pub fn discover(&self, category: Category) -> Result<Vec<Box<dyn Provider>>> {
        self.config
            .providers(category)
            .iter()
            .map(|(name, entry)| self.registry.build(category, name, entry))
            .collect()
    }

    /// Run the providers of one category.
    ///
    /// With a non-empty `include`, only those names run; names that are
    /// unknown or not enabled are warned about and skipped. Otherwise every
    /// enabled provider not named in `exclude` runs.
    pub fn run(
        &self,
        category: Category,
        include: &[String],
        exclude: &[String],
        ctx: &ExecutionContext,
    ) -> Result<RunSummary> {
        let providers = self.discover(category)?;
        let snapshot = ctx.project().is_snapshot();
        let logger = ctx.logger();
        let _scope = logger.push_prefix(category.as_str());
        let mut summary = RunSummary::new(category);

        for wanted in include {
            if !providers.iter().any(|p| p.name() == wanted) {
                logger.warn(&format!("no {category} provider named '{wanted}'; skipping"));
            }
        }

        for provider in &providers {
            let name = provider.name();
            if !include.is_empty() {
                if !include.iter().any(|i| i == name) {
                    summary.skipped.push(name.to_string());
                    continue;
                }
                if !resolve_enabled(provider.as_ref(), snapshot) {
                    logger.warn(&format!("{category} provider '{name}' is not enabled; skipping"));
                    summary.skipped.push(name.to_string());
                    continue;
                }
            } else if exclude.iter().any(|e| e == name) {
                logger.debug(&format!("{name} excluded"));
                summary.skipped.push(name.to_string());
                continue;
            } else if !resolve_enabled(provider.as_ref(), snapshot) {
                logger.debug(&format!(
                    "{name} skipped ({})",
                    if provider.is_enabled() {
                        "snapshots not supported"
                    } else {
                        "disabled"
                    }
                ));
                summary.skipped.push(name.to_string());
                continue;
            }

            let outcome = self.invoke(provider.as_ref(), ctx)?;
            summary.ran.push((name.to_string(), outcome));
        }

        if !summary.any_ran() {
            logger.info(&format!("no {category} providers to run"));
        }
        Ok(summary)
    }

    /// Run one provider between BEFORE and SUCCESS/FAILURE events.
    pub fn invoke(&self, provider: &dyn Provider, ctx: &ExecutionContext) -> Result<Outcome> {
        let name = provider.name();
        let category = provider.category();
        let logger = ctx.logger();
        let _scope = logger.push_prefix(name);

        self.bus.emit(&LifecycleEvent::before(category, name), ctx);
        match provider.execute(ctx) {
            Ok(()) => {
                self.bus.emit(&LifecycleEvent::success(category, name), ctx);
                Ok(Outcome::RanOk)
            }
            Err(StepError::Declared(err)) => {
                logger.warn(&format!("{name} failed: {err}"));
                self.bus
                    .emit(&LifecycleEvent::failure(category, name, err.to_string()), ctx);
                Ok(Outcome::RanFailed)
            }
            Err(StepError::Fatal(err)) => {
                logger.error(&format!("{name} failed: {err:#}"));
                self.bus
                    .emit(&LifecycleEvent::failure(category, name, format!("{err:#}")), ctx);
                Err(err.context(format!("{category} provider {name} failed")))
            }
        }
    }
}
