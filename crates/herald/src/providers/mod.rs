//! Built-in providers.
//!
//! | type | provider |
//! |---|---|
//! | `webhook` | [`webhook::WebhookAnnouncer`] |
//! | `http` | [`http::HttpUploader`] |
//! | `staged` | [`staged::StagedDeployer`] |
//!
//! Providers resolve credentials at the start of `execute`, before any
//! network call, so a missing variable fails that provider alone.

use std::collections::BTreeSet;
use std::path::PathBuf;

use herald_config::ProviderEntry;
use herald_retry::{RetryExecutor, RetryPolicy};
use herald_types::ProjectInfo;

use crate::context::ExecutionContext;
use crate::engine::ProviderRegistry;
use crate::error::{ProviderError, SigningError};
use crate::signing;

pub mod http;
pub mod staged;
pub mod webhook;

/// Registry with every built-in provider type.
pub fn builtin_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register("webhook", webhook::factory);
    registry.register("http", http::factory);
    registry.register("staged", staged::factory);
    registry
}

/// Substitute `{{project_name}}`, `{{project_version}}` and `{{tag_name}}`.
///
/// ```
/// use herald::providers::render_message;
/// use herald::types::ProjectInfo;
///
/// let project = ProjectInfo::new("demo", "1.2.0");
/// assert_eq!(
///     render_message("{{project_name}} {{tag_name}} is out", &project),
///     "demo v1.2.0 is out"
/// );
/// ```
pub fn render_message(template: &str, project: &ProjectInfo) -> String {
    template
        .replace("{{project_name}}", &project.name)
        .replace("{{project_version}}", &project.version)
        .replace("{{tag_name}}", &project.tag_name())
}

/// Read a credential from the environment; absence is a configuration error.
pub(crate) fn require_env(var: &str, what: &str) -> Result<String, ProviderError> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ProviderError::Configuration(format!(
            "{what} is not set (environment variable {var})"
        ))),
    }
}

pub(crate) fn parse_url(url: &str) -> Result<reqwest::Url, ProviderError> {
    if url.trim().is_empty() {
        return Err(ProviderError::Configuration("url is required".to_string()));
    }
    reqwest::Url::parse(url)
        .map_err(|e| ProviderError::Configuration(format!("invalid url '{url}': {e}")))
}

/// `scheme://host[:port]`, for log lines that must not leak paths or tokens.
pub(crate) fn display_origin(url: &reqwest::Url) -> String {
    let host = url.host_str().unwrap_or("?");
    match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    }
}

/// Project artifacts, each followed by its signatures.
///
/// A signature is only sent when `checksums.sha256` from the last complete
/// signing batch lists the artifact with its current contents.
pub(crate) fn release_files(ctx: &ExecutionContext) -> Result<Vec<PathBuf>, ProviderError> {
    let signatures = ctx.signatures_dir();
    let manifest = signing::read_manifest(&signatures).map_err(signing_io)?;
    let mut names = BTreeSet::new();
    let mut files = Vec::new();
    for artifact in ctx.artifacts() {
        if !artifact.is_file() {
            return Err(ProviderError::Configuration(format!(
                "artifact not found: {}",
                artifact.display()
            )));
        }
        let name = file_name(artifact);
        if !names.insert(name.clone()) {
            return Err(ProviderError::Configuration(format!(
                "more than one artifact is named {name}"
            )));
        }
        files.push(artifact.clone());

        let Some(recorded) = manifest.get(&name) else {
            continue;
        };
        if signing::file_checksum(artifact).map_err(signing_io)? != *recorded {
            ctx.logger().warn(&format!(
                "not sending signatures for {name}: the artifact changed since it was signed"
            ));
            continue;
        }
        for armored in [true, false] {
            let signature = signing::signature_path(&signatures, artifact, armored);
            if signature.is_file() {
                files.push(signature);
            }
        }
    }
    Ok(files)
}

fn signing_io(err: SigningError) -> ProviderError {
    match err {
        SigningError::Io { path, source } => ProviderError::io(path.display().to_string(), source),
        other => ProviderError::Configuration(other.to_string()),
    }
}

pub(crate) fn retry_for(entry: &ProviderEntry, fallback: RetryPolicy) -> RetryExecutor {
    match &entry.retry {
        Some(config) => RetryExecutor::new(config.clone()),
        None => RetryExecutor::from_policy(fallback),
    }
}

pub(crate) fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::test_support::{Level, context_in};

    #[test]
    fn builtin_registry_knows_every_type() {
        let registry = builtin_registry();
        assert_eq!(registry.kinds().collect::<Vec<_>>(), ["http", "staged", "webhook"]);
    }

    #[test]
    fn render_message_substitutes_every_placeholder() {
        let project = ProjectInfo::new("demo", "3.1.4");
        assert_eq!(
            render_message("{{project_name}}@{{project_version}} ({{tag_name}}) {{unknown}}", &project),
            "demo@3.1.4 (v3.1.4) {{unknown}}"
        );
    }

    #[test]
    fn require_env_reports_variable_name() {
        temp_env::with_var_unset("HERALD_TEST_TOKEN", || {
            let err = require_env("HERALD_TEST_TOKEN", "upload token").expect_err("unset");
            assert!(matches!(err, ProviderError::Configuration(_)));
            assert!(err.to_string().contains("HERALD_TEST_TOKEN"));
        });
        temp_env::with_var("HERALD_TEST_TOKEN", Some("t"), || {
            assert_eq!(require_env("HERALD_TEST_TOKEN", "upload token").expect("set"), "t");
        });
    }

    #[test]
    fn display_origin_hides_path() {
        let url = parse_url("https://hooks.example:8443/services/T000/secret").expect("url");
        assert_eq!(display_origin(&url), "https://hooks.example:8443");
        assert!(parse_url("").is_err());
        assert!(parse_url("not a url").is_err());
    }

    fn signed_context(dir: &Path) -> ExecutionContext {
        let (ctx, _) = context_in(dir, false);
        let ctx = ctx.with_artifacts([PathBuf::from("a.tar.gz"), PathBuf::from("b.zip")]);
        fs::write(dir.join("a.tar.gz"), "a").expect("write");
        fs::write(dir.join("b.zip"), "b").expect("write");
        fs::create_dir_all(ctx.signatures_dir()).expect("mkdir");
        fs::write(ctx.signatures_dir().join("a.tar.gz.asc"), "sig").expect("write");
        ctx
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files.iter().map(|f| file_name(f)).collect()
    }

    #[test]
    fn release_files_include_signatures_listed_in_manifest() {
        let td = tempdir().expect("tempdir");
        let ctx = signed_context(td.path());
        let checksum = signing::file_checksum(&td.path().join("a.tar.gz")).expect("checksum");
        fs::write(
            ctx.signatures_dir().join(signing::CHECKSUMS_FILE),
            format!("{checksum}  a.tar.gz\n"),
        )
        .expect("write");

        let files = release_files(&ctx).expect("files");
        assert_eq!(names(&files), ["a.tar.gz", "a.tar.gz.asc", "b.zip"]);
    }

    #[test]
    fn signatures_without_manifest_are_not_sent() {
        let td = tempdir().expect("tempdir");
        let ctx = signed_context(td.path());

        let files = release_files(&ctx).expect("files");
        assert_eq!(names(&files), ["a.tar.gz", "b.zip"]);
    }

    #[test]
    fn stale_signatures_are_not_sent() {
        let td = tempdir().expect("tempdir");
        let (ctx, reporter) = context_in(td.path(), false);
        let ctx = ctx.with_artifacts([PathBuf::from("a.tar.gz")]);
        fs::write(td.path().join("a.tar.gz"), "old build").expect("write");
        let checksum = signing::file_checksum(&td.path().join("a.tar.gz")).expect("checksum");
        fs::create_dir_all(ctx.signatures_dir()).expect("mkdir");
        fs::write(ctx.signatures_dir().join("a.tar.gz.asc"), "sig").expect("write");
        fs::write(
            ctx.signatures_dir().join(signing::CHECKSUMS_FILE),
            format!("{checksum}  a.tar.gz\n"),
        )
        .expect("write");
        fs::write(td.path().join("a.tar.gz"), "rebuilt").expect("write");

        let files = release_files(&ctx).expect("files");
        assert_eq!(names(&files), ["a.tar.gz"]);
        assert!(
            reporter
                .messages(Level::Warn)
                .iter()
                .any(|m| m.contains("a.tar.gz") && m.contains("changed since it was signed"))
        );
    }

    #[test]
    fn duplicate_artifact_names_are_configuration_error() {
        let td = tempdir().expect("tempdir");
        let (ctx, _) = context_in(td.path(), false);
        let ctx = ctx.with_artifacts([PathBuf::from("a/x.jar"), PathBuf::from("b/x.jar")]);
        for dir in ["a", "b"] {
            fs::create_dir_all(td.path().join(dir)).expect("mkdir");
            fs::write(td.path().join(dir).join("x.jar"), dir).expect("write");
        }

        let err = release_files(&ctx).expect_err("duplicate");
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(err.to_string().contains("x.jar"));
    }

    #[test]
    fn missing_artifact_is_configuration_error() {
        let td = tempdir().expect("tempdir");
        let (ctx, _) = context_in(td.path(), false);
        let ctx = ctx.with_artifacts([PathBuf::from("absent.tar.gz")]);
        let err = release_files(&ctx).expect_err("missing");
        assert!(err.to_string().contains("absent.tar.gz"));
    }
}
