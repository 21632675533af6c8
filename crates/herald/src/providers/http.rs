//! Plain HTTP file store uploader (`type = "http"`).
//!
//! Every artifact, and each signature produced for it, is PUT to
//! `<url>/<file name>`.

use anyhow::Result;
use herald_config::ProviderEntry;
use herald_retry::{RetryExecutor, RetryPolicy};
use herald_types::{Category, ProviderDescriptor};
use serde::Deserialize;

use super::{display_origin, file_name, parse_url, release_files, require_env, retry_for};
use crate::context::ExecutionContext;
use crate::engine::Provider;
use crate::error::StepError;
use crate::transfer::{self, Auth};

#[derive(Debug, Clone, Deserialize)]
pub struct HttpOptions {
    pub url: String,
    /// Environment variable holding a bearer token
    #[serde(default)]
    pub token_env: Option<String>,
}

pub struct HttpUploader {
    descriptor: ProviderDescriptor,
    options: HttpOptions,
    retry: RetryExecutor,
}

pub fn factory(descriptor: ProviderDescriptor, entry: &ProviderEntry) -> Result<Box<dyn Provider>> {
    let options: HttpOptions = entry.options_as()?;
    Ok(Box::new(HttpUploader {
        descriptor,
        options,
        retry: retry_for(entry, RetryPolicy::Default),
    }))
}

impl Provider for HttpUploader {
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
        let url = parse_url(&self.options.url)?;
        let auth = match &self.options.token_env {
            Some(var) => Auth::Bearer(require_env(var, "upload token")?),
            None => Auth::None,
        };
        let files = release_files(ctx)?;
        if files.is_empty() {
            ctx.logger().info("no artifacts to upload");
            return Ok(());
        }

        let client = transfer::build_client(self.descriptor.timeouts.connect, self.descriptor.timeouts.read)?;
        let base = url.as_str().trim_end_matches('/');
        let origin = display_origin(&url);

        for file in &files {
            let name = file_name(file);
            let target = format!("{base}/{name}");
            ctx.perform(&format!("uploading {name} to {origin}"), || {
                transfer::put_file(&client, &target, file, &auth, &self.retry)
            })?;
        }
        ctx.logger().info(&format!("uploaded {} file(s)", files.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use tempfile::tempdir;
    use tiny_http::{Method, Response, Server, StatusCode};

    use super::*;
    use crate::error::ProviderError;
    use crate::test_support::context_in;

    type Seen = Arc<Mutex<Vec<(String, String, Option<String>)>>>;

    fn serve(count: usize) -> (String, Seen, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").expect("server");
        let url = format!("http://{}/releases", server.server_addr());
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let seen_thread = Arc::clone(&seen);
        let handle = thread::spawn(move || {
            for _ in 0..count {
                let Ok(Some(mut req)) = server.recv_timeout(Duration::from_secs(5)) else {
                    return;
                };
                assert_eq!(*req.method(), Method::Put);
                let mut body = String::new();
                req.as_reader().read_to_string(&mut body).expect("body");
                let auth = req
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_string());
                seen_thread
                    .lock()
                    .expect("lock")
                    .push((req.url().to_string(), body, auth));
                req.respond(Response::empty(StatusCode(201))).expect("respond");
            }
        });
        (url, seen, handle)
    }

    fn sha256_hex(bytes: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(bytes))
    }

    fn write_manifest(ctx: &ExecutionContext, checksum: &str) {
        std::fs::write(
            ctx.signatures_dir().join(crate::signing::CHECKSUMS_FILE),
            format!("{checksum}  demo.tar.gz\n"),
        )
        .expect("write");
    }

    fn uploader(url: &str, token_env: Option<&str>) -> Box<dyn Provider> {
        let mut entry = ProviderEntry::new("http");
        entry.options.insert("url".into(), toml::Value::String(url.into()));
        if let Some(var) = token_env {
            entry.options.insert("token_env".into(), toml::Value::String(var.into()));
        }
        factory(entry.descriptor(Category::Upload, "files"), &entry).expect("factory")
    }

    #[test]
    fn uploads_artifacts_and_signatures_with_token() {
        let td = tempdir().expect("tempdir");
        let (ctx, _) = context_in(td.path(), false);
        let ctx = ctx.with_artifacts([PathBuf::from("demo.tar.gz")]);
        std::fs::write(td.path().join("demo.tar.gz"), "tarball").expect("write");
        std::fs::create_dir_all(ctx.signatures_dir()).expect("mkdir");
        std::fs::write(ctx.signatures_dir().join("demo.tar.gz.asc"), "signature").expect("write");
        write_manifest(&ctx, &sha256_hex(b"tarball"));

        let (url, seen, handle) = serve(2);
        temp_env::with_var("HERALD_TEST_UPLOAD_TOKEN", Some("s3cret"), || {
            uploader(&url, Some("HERALD_TEST_UPLOAD_TOKEN"))
                .execute(&ctx)
                .expect("execute");
        });
        handle.join().expect("join");

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "/releases/demo.tar.gz");
        assert_eq!(seen[0].1, "tarball");
        assert_eq!(seen[0].2.as_deref(), Some("Bearer s3cret"));
        assert_eq!(seen[1].0, "/releases/demo.tar.gz.asc");
    }

    #[test]
    fn signatures_of_an_earlier_build_are_not_uploaded() {
        let td = tempdir().expect("tempdir");
        let (ctx, _) = context_in(td.path(), false);
        let ctx = ctx.with_artifacts([PathBuf::from("demo.tar.gz")]);
        std::fs::write(td.path().join("demo.tar.gz"), "rebuilt tarball").expect("write");
        std::fs::create_dir_all(ctx.signatures_dir()).expect("mkdir");
        std::fs::write(ctx.signatures_dir().join("demo.tar.gz.asc"), "signature").expect("write");
        write_manifest(&ctx, &sha256_hex(b"tarball"));

        let (url, seen, handle) = serve(1);
        uploader(&url, None).execute(&ctx).expect("execute");
        handle.join().expect("join");

        let seen = seen.lock().expect("lock");
        let paths: Vec<&str> = seen.iter().map(|(path, _, _)| path.as_str()).collect();
        assert_eq!(paths, ["/releases/demo.tar.gz"]);
    }

    #[test]
    fn missing_token_is_configuration_error() {
        let td = tempdir().expect("tempdir");
        let (ctx, _) = context_in(td.path(), false);
        temp_env::with_var_unset("HERALD_TEST_UPLOAD_TOKEN", || {
            let err = uploader("http://127.0.0.1:9/x", Some("HERALD_TEST_UPLOAD_TOKEN"))
                .execute(&ctx)
                .expect_err("fail");
            assert!(matches!(err, StepError::Declared(ProviderError::Configuration(_))));
        });
    }

    #[test]
    fn dry_run_uploads_nothing() {
        let td = tempdir().expect("tempdir");
        let (ctx, reporter) = context_in(td.path(), true);
        let ctx = ctx.with_artifacts([PathBuf::from("demo.tar.gz")]);
        std::fs::write(td.path().join("demo.tar.gz"), "tarball").expect("write");

        // Port 9 (discard) is never contacted on a dry run.
        uploader("http://127.0.0.1:9/releases", None)
            .execute(&ctx)
            .expect("execute");
        let lines = reporter.messages(crate::test_support::Level::Info);
        assert_eq!(lines[0], "[dry-run] uploading demo.tar.gz to http://127.0.0.1:9");
    }
}
