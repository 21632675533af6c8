//! Core domain types for herald.
//!
//! This crate provides the vocabulary shared by every herald crate: provider
//! categories and descriptors, staging stages and the operations derived from
//! them, lifecycle phases, and the records produced by the signing stage.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider category. Each category is dispatched independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Chat/social notifications about the release
    Announce,
    /// Plain file stores receiving release artifacts
    Upload,
    /// Package repositories, usually staged
    Deploy,
}

impl Category {
    /// Order in which a full release runs the categories.
    pub const RELEASE_ORDER: [Category; 3] = [Category::Deploy, Category::Upload, Category::Announce];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Announce => "announce",
            Category::Upload => "upload",
            Category::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "announce" => Ok(Category::Announce),
            "upload" => Ok(Category::Upload),
            "deploy" => Ok(Category::Deploy),
            other => Err(format!("unknown provider category: {other}")),
        }
    }
}

/// One phase of a staging repository's lifecycle. Ordinals only increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Close,
    Release,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Close => "close",
            Stage::Release => "release",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upload" => Ok(Stage::Upload),
            "close" => Ok(Stage::Close),
            "release" => Ok(Stage::Release),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// The set of stages a single deployment request walks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOperation {
    Upload,
    UploadAndClose,
    Close,
    CloseAndRelease,
    Release,
    FullDeployment,
}

impl StageOperation {
    /// Whether this operation performs the given stage.
    pub fn includes(&self, stage: Stage) -> bool {
        use StageOperation::*;
        match stage {
            Stage::Upload => matches!(self, Upload | UploadAndClose | FullDeployment),
            Stage::Close => matches!(self, UploadAndClose | Close | CloseAndRelease | FullDeployment),
            Stage::Release => matches!(self, CloseAndRelease | Release | FullDeployment),
        }
    }

    /// The first stage this operation performs.
    pub fn first_stage(&self) -> Stage {
        if self.includes(Stage::Upload) {
            Stage::Upload
        } else if self.includes(Stage::Close) {
            Stage::Close
        } else {
            Stage::Release
        }
    }
}

impl fmt::Display for StageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageOperation::Upload => "upload",
            StageOperation::UploadAndClose => "upload_and_close",
            StageOperation::Close => "close",
            StageOperation::CloseAndRelease => "close_and_release",
            StageOperation::Release => "release",
            StageOperation::FullDeployment => "full_deployment",
        };
        f.write_str(s)
    }
}

/// Lifecycle phase around a single provider invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Before,
    Success,
    Failure,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepPhase::Before => write!(f, "before"),
            StepPhase::Success => write!(f, "success"),
            StepPhase::Failure => write!(f, "failure"),
        }
    }
}

/// Result of invoking one provider whose failure, if any, was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    RanOk,
    RanFailed,
}

/// Per-provider network timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
    #[serde(with = "humantime_serde")]
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(20),
            read: Duration::from_secs(60),
        }
    }
}

/// Resolved, immutable description of one configured provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub category: Category,
    /// Unique within the category
    pub name: String,
    /// Provider type key used by the registry (e.g. `webhook`)
    pub kind: String,
    pub enabled: bool,
    pub snapshot_supported: bool,
    pub timeouts: Timeouts,
}

/// The project being released.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub version: String,
    /// Explicit snapshot flag; a `-SNAPSHOT` version suffix also counts.
    #[serde(default)]
    pub snapshot: bool,
}

impl ProjectInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            snapshot: false,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot || self.version.to_ascii_uppercase().ends_with("-SNAPSHOT")
    }

    pub fn tag_name(&self) -> String {
        format!("v{}", self.version)
    }
}

/// A detached signature produced for one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSignature {
    pub source_path: PathBuf,
    pub signature_path: PathBuf,
    pub armored: bool,
}

/// A remote staging repository as observed by the deployer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingRepository {
    pub id: String,
    pub profile_id: String,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
}
