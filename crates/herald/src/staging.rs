//! Staged repository deployment.
//!
//! Package repositories such as Nexus hold uploads in a server-side staging
//! repository that moves through UPLOAD → CLOSE → RELEASE. Close and release
//! are asynchronous on the server, so each transition is requested and then
//! polled until the repository reports the new stage.
//!
//! A repository is never dropped by herald: on a timeout it is left in place
//! and the error names its id so an operator can finish or drop it by hand.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use herald_retry::{PollConfig, PollResult, PollStatus, RetryExecutor, poll_until};
use herald_types::{Stage, StageOperation, StagingRepository};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;

use crate::context::ExecutionContext;
use crate::error::ProviderError;
use crate::transfer::{self, Auth};

/// Work out which stages a deployment performs.
///
/// ```
/// use herald::staging::resolve_operation;
/// use herald::types::{Stage, StageOperation};
///
/// assert_eq!(resolve_operation(None, Some(Stage::Close)).unwrap(), StageOperation::UploadAndClose);
/// assert!(resolve_operation(Some(Stage::Close), Some(Stage::Upload)).is_err());
/// ```
pub fn resolve_operation(
    start: Option<Stage>,
    end: Option<Stage>,
) -> Result<StageOperation, ProviderError> {
    use Stage::*;

    let operation = match (start, end) {
        (None | Some(Upload), Some(Upload)) => StageOperation::Upload,
        (None | Some(Upload), Some(Close)) => StageOperation::UploadAndClose,
        (None | Some(Upload), None | Some(Release)) => StageOperation::FullDeployment,
        (Some(Close), Some(Close)) => StageOperation::Close,
        (Some(Close), None | Some(Release)) => StageOperation::CloseAndRelease,
        (Some(Release), None | Some(Release)) => StageOperation::Release,
        (Some(start), Some(end)) => {
            return Err(ProviderError::Configuration(format!(
                "cannot deploy from stage {start} to earlier stage {end}"
            )));
        }
    };
    Ok(operation)
}

/// Remote state of one staging repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatus {
    pub stage: Stage,
    /// A requested transition is still running on the server.
    pub transitioning: bool,
    /// The server rejected the last transition.
    pub failure: Option<String>,
}

/// Remote operations a staged deployment needs.
pub trait StagingClient {
    fn create_staging_repository(
        &self,
        profile_id: &str,
        group_id: &str,
    ) -> Result<StagingRepository, ProviderError>;

    /// The open repository for a profile/group, if any.
    fn find_repository(
        &self,
        profile_id: &str,
        group_id: &str,
    ) -> Result<Option<StagingRepository>, ProviderError>;

    fn get_repository(&self, repository_id: &str) -> Result<StagingRepository, ProviderError>;

    fn upload(&self, repository: &StagingRepository, artifact: &Path) -> Result<(), ProviderError>;

    fn close(&self, repository: &StagingRepository) -> Result<(), ProviderError>;

    fn release(&self, repository: &StagingRepository) -> Result<(), ProviderError>;

    fn get_stage(&self, repository_id: &str) -> Result<StageStatus, ProviderError>;
}

/// Everything one staged deployment needs to know.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub profile_id: String,
    pub group_id: String,
    /// Existing repository for operations that skip UPLOAD
    pub repository_id: Option<String>,
    pub operation: StageOperation,
    pub artifacts: Vec<PathBuf>,
    pub transitions: PollConfig,
}

/// Drive `plan` against `client`.
///
/// Returns the repository acted on, or `None` on a dry run that would have
/// created one.
pub fn deploy(
    client: &dyn StagingClient,
    plan: &DeploymentPlan,
    ctx: &ExecutionContext,
) -> Result<Option<StagingRepository>, ProviderError> {
    let logger = ctx.logger();
    logger.info(&format!("staging operation: {}", plan.operation));

    let repository = if plan.operation.includes(Stage::Upload) {
        let created = ctx.perform(
            &format!("creating staging repository for profile {}", plan.profile_id),
            || client.create_staging_repository(&plan.profile_id, &plan.group_id),
        )?;
        if let Some(repo) = &created {
            logger.info(&format!("created staging repository {}", repo.id));
        }

        let _indent = logger.indent();
        for artifact in &plan.artifacts {
            ctx.perform(&format!("uploading {}", file_name(artifact)), || match &created {
                Some(repo) => client.upload(repo, artifact),
                None => Ok(()),
            })?;
        }
        created
    } else if ctx.dry_run() {
        logger.info(&format!(
            "[dry-run] using {}",
            plan.repository_id
                .as_deref()
                .map(|id| format!("staging repository {id}"))
                .unwrap_or_else(|| format!("open staging repository for profile {}", plan.profile_id))
        ));
        None
    } else {
        let repo = existing_repository(client, plan)?;
        logger.info(&format!("using staging repository {}", repo.id));
        Some(repo)
    };

    for stage in [Stage::Close, Stage::Release] {
        if !plan.operation.includes(stage) {
            continue;
        }
        let Some(repo) = &repository else {
            logger.info(&format!("[dry-run] requesting {stage} and waiting for it to complete"));
            continue;
        };

        let description = format!("requesting {stage} of staging repository {}", repo.id);
        ctx.perform(&description, || match stage {
            Stage::Release => client.release(repo),
            _ => client.close(repo),
        })?;
        await_stage(client, &repo.id, stage, &plan.transitions, ctx)?;
    }

    Ok(repository.map(|mut repo| {
        if plan.operation.includes(Stage::Release) {
            repo.stage = Stage::Release;
        } else if plan.operation.includes(Stage::Close) {
            repo.stage = Stage::Close;
        }
        repo
    }))
}

fn existing_repository(
    client: &dyn StagingClient,
    plan: &DeploymentPlan,
) -> Result<StagingRepository, ProviderError> {
    if let Some(id) = &plan.repository_id {
        return client.get_repository(id);
    }
    client
        .find_repository(&plan.profile_id, &plan.group_id)?
        .ok_or_else(|| {
            ProviderError::Configuration(format!(
                "{} starts at {} but no open staging repository exists for profile {} (set repository_id)",
                plan.operation,
                plan.operation.first_stage(),
                plan.profile_id
            ))
        })
}

/// Poll until the repository settles at `target` or the budget runs out.
///
/// A transient failure while checking uses up one check.
fn await_stage(
    client: &dyn StagingClient,
    repository_id: &str,
    target: Stage,
    poll: &PollConfig,
    ctx: &ExecutionContext,
) -> Result<StageStatus, ProviderError> {
    let result = poll_until(poll, |check| {
        let status = match client.get_stage(repository_id) {
            Ok(status) => status,
            Err(ProviderError::TransientRemote(reason)) => {
                ctx.logger().warn(&format!(
                    "checking staging repository {repository_id} failed (check {check}/{}): {reason}",
                    poll.max_checks
                ));
                return Ok(PollStatus::Pending);
            }
            Err(other) => return Err(other),
        };
        if let Some(failure) = &status.failure {
            return Err(ProviderError::PermanentRemote(format!(
                "staging repository {repository_id} failed to {target}: {failure}"
            )));
        }
        if !status.transitioning && status.stage >= target {
            return Ok(PollStatus::Ready(status));
        }
        ctx.logger().debug(&format!(
            "staging repository {repository_id} is {}{} (check {check}/{})",
            status.stage,
            if status.transitioning { ", transitioning" } else { "" },
            poll.max_checks
        ));
        Ok(PollStatus::Pending)
    })?;

    match result {
        PollResult::Ready { value, checks } => {
            ctx.logger()
                .info(&format!("staging repository {repository_id} reached {target} after {checks} check(s)"));
            Ok(value)
        }
        PollResult::Exhausted { checks } => Err(ProviderError::StateTimeout {
            repository_id: repository_id.to_string(),
            stage: target,
            checks,
        }),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// [`StagingClient`] for a Nexus-style staging REST API rooted at
/// `.../service/local`.
pub struct HttpStagingClient {
    client: Client,
    base_url: String,
    auth: Auth,
    /// Path prefix for uploads: `group/as/path/name/version`
    artifact_path: String,
    retry: RetryExecutor,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    staged_repository_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteRepository {
    repository_id: String,
    #[serde(default)]
    profile_id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    transitioning: bool,
    #[serde(default)]
    notifications: u32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    created: Option<String>,
}

impl RemoteRepository {
    fn stage(&self) -> Stage {
        match self.kind.as_str() {
            "released" => Stage::Release,
            "closed" => Stage::Close,
            _ => Stage::Upload,
        }
    }

    fn into_repository(self) -> StagingRepository {
        StagingRepository {
            stage: self.stage(),
            created_at: self
                .created
                .as_deref()
                .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
                .map(|c| c.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            id: self.repository_id,
            profile_id: self.profile_id,
        }
    }
}

impl HttpStagingClient {
    pub(crate) fn new(
        client: Client,
        base_url: &str,
        auth: Auth,
        artifact_path: String,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            artifact_path,
            retry,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/staging/{}", self.base_url, path)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let response = self
            .auth
            .apply(self.client.get(url))
            .header("Accept", "application/json")
            .send()
            .map_err(|e| transfer::transport_error(url, e))?;
        let response = transfer::check_status(url, response)?;
        response
            .json()
            .map_err(|e| ProviderError::PermanentRemote(format!("{url}: invalid response: {e}")))
    }

    fn post_json(&self, url: &str, body: serde_json::Value) -> Result<reqwest::blocking::Response, ProviderError> {
        let response = self
            .auth
            .apply(self.client.post(url))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .map_err(|e| transfer::transport_error(url, e))?;
        transfer::check_status(url, response)
    }

    fn bulk(&self, action: &str, repository: &StagingRepository) -> Result<(), ProviderError> {
        let url = self.url(&format!("bulk/{action}"));
        self.post_json(
            &url,
            json!({ "data": {
                "stagedRepositoryIds": [repository.id],
                "description": format!("herald {action}"),
            }}),
        )
        .map(drop)
    }
}

impl StagingClient for HttpStagingClient {
    fn create_staging_repository(
        &self,
        profile_id: &str,
        group_id: &str,
    ) -> Result<StagingRepository, ProviderError> {
        let url = self.url(&format!("profiles/{profile_id}/start"));
        let response = self.post_json(
            &url,
            json!({ "data": { "description": format!("herald: {group_id}") } }),
        )?;
        let started: DataEnvelope<StartResponse> = response
            .json()
            .map_err(|e| ProviderError::PermanentRemote(format!("{url}: invalid response: {e}")))?;

        Ok(StagingRepository {
            id: started.data.staged_repository_id,
            profile_id: profile_id.to_string(),
            stage: Stage::Upload,
            created_at: Utc::now(),
        })
    }

    fn find_repository(
        &self,
        profile_id: &str,
        group_id: &str,
    ) -> Result<Option<StagingRepository>, ProviderError> {
        let url = self.url(&format!("profile_repositories/{profile_id}"));
        let listed: DataEnvelope<Vec<RemoteRepository>> = self.get_json(&url)?;
        Ok(listed
            .data
            .into_iter()
            .filter(|r| r.kind == "open" && !r.transitioning)
            .find(|r| group_id.is_empty() || r.description.contains(group_id))
            .map(RemoteRepository::into_repository))
    }

    fn get_repository(&self, repository_id: &str) -> Result<StagingRepository, ProviderError> {
        let url = self.url(&format!("repository/{repository_id}"));
        let remote: RemoteRepository = self.get_json(&url)?;
        Ok(remote.into_repository())
    }

    fn upload(&self, repository: &StagingRepository, artifact: &Path) -> Result<(), ProviderError> {
        let url = self.url(&format!(
            "deployByRepositoryId/{}/{}/{}",
            repository.id,
            self.artifact_path,
            file_name(artifact)
        ));
        transfer::put_file(&self.client, &url, artifact, &self.auth, &self.retry)
    }

    fn close(&self, repository: &StagingRepository) -> Result<(), ProviderError> {
        self.bulk("close", repository)
    }

    fn release(&self, repository: &StagingRepository) -> Result<(), ProviderError> {
        self.bulk("promote", repository)
    }

    fn get_stage(&self, repository_id: &str) -> Result<StageStatus, ProviderError> {
        let url = self.url(&format!("repository/{repository_id}"));
        let remote: RemoteRepository = self.get_json(&url)?;
        let stage = remote.stage();
        let failure = (stage == Stage::Upload && !remote.transitioning && remote.notifications > 0)
            .then(|| format!("{} rule notification(s) reported", remote.notifications));
        Ok(StageStatus {
            stage,
            transitioning: remote.transitioning,
            failure,
        })
    }
}
