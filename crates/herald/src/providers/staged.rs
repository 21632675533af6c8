//! Staged repository deployer (`type = "staged"`).

use std::time::Duration;

use anyhow::Result;
use herald_config::ProviderEntry;
use herald_retry::{PollConfig, RetryExecutor, RetryPolicy};
use herald_types::{Category, ProviderDescriptor, Stage};
use serde::Deserialize;

use super::{parse_url, release_files, require_env, retry_for};
use crate::context::ExecutionContext;
use crate::engine::Provider;
use crate::error::{ProviderError, StepError};
use crate::staging::{self, DeploymentPlan, HttpStagingClient};
use crate::transfer::{self, Auth};

#[derive(Debug, Clone, Deserialize)]
pub struct StagedOptions {
    /// Staging API root, e.g. `https://host/service/local`
    pub url: String,
    pub profile_id: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub username_env: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub start_stage: Option<Stage>,
    #[serde(default)]
    pub end_stage: Option<Stage>,
    /// Repository to act on when starting at close or release
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default = "default_transition_delay", with = "humantime_serde")]
    pub transition_delay: Duration,
    #[serde(default = "default_transition_max_retries")]
    pub transition_max_retries: u32,
}

fn default_transition_delay() -> Duration {
    PollConfig::default().interval
}

fn default_transition_max_retries() -> u32 {
    PollConfig::default().max_checks
}

pub struct StagedDeployer {
    descriptor: ProviderDescriptor,
    options: StagedOptions,
    retry: RetryExecutor,
}

pub fn factory(descriptor: ProviderDescriptor, entry: &ProviderEntry) -> Result<Box<dyn Provider>> {
    let options: StagedOptions = entry.options_as()?;
    Ok(Box::new(StagedDeployer {
        descriptor,
        options,
        retry: retry_for(entry, RetryPolicy::None),
    }))
}

impl StagedDeployer {
    fn auth(&self) -> Result<Auth, ProviderError> {
        match (&self.options.username_env, &self.options.password_env) {
            (Some(user), Some(pass)) => Ok(Auth::Basic {
                username: require_env(user, "staging username")?,
                password: require_env(pass, "staging password")?,
            }),
            (None, None) => Ok(Auth::None),
            _ => Err(ProviderError::Configuration(
                "username_env and password_env must be set together".to_string(),
            )),
        }
    }

    /// `com/example/<project>/<version>` under the staging repository.
    fn artifact_path(&self, ctx: &ExecutionContext) -> String {
        let project = ctx.project();
        let mut parts: Vec<&str> = self
            .options
            .group_id
            .split('.')
            .filter(|p| !p.is_empty())
            .collect();
        parts.push(&project.name);
        parts.push(&project.version);
        parts.join("/")
    }
}

impl Provider for StagedDeployer {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn category(&self) -> Category {
        self.descriptor.category
    }

    fn is_enabled(&self) -> bool {
        self.descriptor.enabled
    }

    fn is_snapshot_supported(&self) -> bool {
        self.descriptor.snapshot_supported
    }

    fn execute(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        let operation = staging::resolve_operation(self.options.start_stage, self.options.end_stage)?;
        let url = parse_url(&self.options.url)?;
        if self.options.profile_id.trim().is_empty() {
            return Err(ProviderError::Configuration("profile_id is required".to_string()).into());
        }
        let auth = self.auth()?;
        let artifacts = if operation.includes(Stage::Upload) {
            release_files(ctx)?
        } else {
            Vec::new()
        };

        let timeouts = self.descriptor.timeouts;
        let client = HttpStagingClient::new(
            transfer::build_client(timeouts.connect, timeouts.read)?,
            url.as_str(),
            auth,
            self.artifact_path(ctx),
            RetryExecutor::new(self.retry.config().clone()),
        );
        let plan = DeploymentPlan {
            profile_id: self.options.profile_id.clone(),
            group_id: self.options.group_id.clone(),
            repository_id: self.options.repository_id.clone(),
            operation,
            artifacts,
            transitions: PollConfig {
                interval: self.options.transition_delay,
                max_checks: self.options.transition_max_retries,
            },
        };

        staging::deploy(&client, &plan, ctx)?;
        Ok(())
    }
}
