//! Webhook announcer (`type = "webhook"`).

use anyhow::Result;
use chrono::Utc;
use herald_config::ProviderEntry;
use herald_retry::{RetryExecutor, RetryPolicy};
use herald_types::{Category, ProviderDescriptor};
use herald_webhook::{AnnouncePayload, WebhookClient, WebhookError};
use serde::Deserialize;

use super::{display_origin, parse_url, render_message, require_env, retry_for};
use crate::context::ExecutionContext;
use crate::engine::Provider;
use crate::error::{ProviderError, StepError};

pub const DEFAULT_MESSAGE: &str = "{{project_name}} {{project_version}} has been released";

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookOptions {
    pub url: String,
    /// Environment variable holding the HMAC secret
    #[serde(default)]
    pub secret_env: Option<String>,
    #[serde(default = "default_message")]
    pub message: String,
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

pub struct WebhookAnnouncer {
    descriptor: ProviderDescriptor,
    options: WebhookOptions,
    retry: RetryExecutor,
}

pub fn factory(descriptor: ProviderDescriptor, entry: &ProviderEntry) -> Result<Box<dyn Provider>> {
    let options: WebhookOptions = entry.options_as()?;
    Ok(Box::new(WebhookAnnouncer {
        descriptor,
        options,
        retry: retry_for(entry, RetryPolicy::None),
    }))
}

fn classify(err: WebhookError) -> ProviderError {
    if err.is_transient() {
        ProviderError::TransientRemote(err.to_string())
    } else {
        ProviderError::PermanentRemote(err.to_string())
    }
}

impl Provider for WebhookAnnouncer {
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
        let secret = self
            .options
            .secret_env
            .as_deref()
            .map(|var| require_env(var, "webhook secret"))
            .transpose()?;

        let project = ctx.project();
        let payload = AnnouncePayload {
            timestamp: Utc::now(),
            project: project.name.clone(),
            version: project.version.clone(),
            tag: project.tag_name(),
            message: render_message(&self.options.message, project),
        };
        ctx.logger().debug(&format!("message: {}", payload.message));

        let timeouts = self.descriptor.timeouts;
        let client = WebhookClient::new(url.as_str(), secret, timeouts.connect, timeouts.read)
            .map_err(|e| ProviderError::Configuration(format!("failed to build webhook client: {e}")))?;

        ctx.perform(
            &format!("posting announcement to {}", display_origin(&url)),
            || {
                self.retry.run_if(
                    |_| client.send(&payload).map_err(classify),
                    ProviderError::is_transient,
                )
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use herald_types::StepPhase;
    use tempfile::tempdir;
    use tiny_http::{Response, Server, StatusCode};

    use super::*;
    use crate::test_support::{CollectingReporter, Level, context_in};

    fn entry(url: &str) -> ProviderEntry {
        let mut entry = ProviderEntry::new("webhook");
        entry.options.insert("url".into(), toml::Value::String(url.into()));
        entry
    }

    fn build(entry: &ProviderEntry) -> Box<dyn Provider> {
        factory(entry.descriptor(Category::Announce, "hook"), entry).expect("factory")
    }

    fn serve_once(status: u16) -> (String, Arc<Mutex<Vec<String>>>, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").expect("server");
        let url = format!("http://{}/hook", server.server_addr());
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&bodies);
        let handle = thread::spawn(move || {
            if let Ok(Some(mut req)) = server.recv_timeout(Duration::from_secs(5)) {
                let mut body = String::new();
                req.as_reader().read_to_string(&mut body).expect("body");
                seen.lock().expect("lock").push(body);
                req.respond(Response::empty(StatusCode(status))).expect("respond");
            }
        });
        (url, bodies, handle)
    }

    #[test]
    fn posts_rendered_message() {
        let td = tempdir().expect("tempdir");
        let (ctx, _) = context_in(td.path(), false);
        let (url, bodies, handle) = serve_once(200);
        let mut entry = entry(&url);
        entry.options.insert(
            "message".into(),
            toml::Value::String("{{project_name}} {{tag_name}} shipped".into()),
        );

        build(&entry).execute(&ctx).expect("execute");
        handle.join().expect("join");

        let bodies = bodies.lock().expect("lock");
        let payload: AnnouncePayload = serde_json::from_str(&bodies[0]).expect("json");
        assert_eq!(payload.message, "demo v1.0.0 shipped");
        assert_eq!(payload.tag, "v1.0.0");
    }

    #[test]
    fn rejected_announcement_is_declared_permanent() {
        let td = tempdir().expect("tempdir");
        let (ctx, _) = context_in(td.path(), false);
        let (url, _, handle) = serve_once(403);

        let err = build(&entry(&url)).execute(&ctx).expect_err("fail");
        handle.join().expect("join");
        assert!(matches!(err, StepError::Declared(ProviderError::PermanentRemote(_))));
    }

    #[test]
    fn missing_secret_fails_before_network() {
        let td = tempdir().expect("tempdir");
        let (ctx, _) = context_in(td.path(), false);
        let mut entry = entry("http://127.0.0.1:9/never");
        entry
            .options
            .insert("secret_env".into(), toml::Value::String("HERALD_TEST_HOOK_SECRET".into()));

        temp_env::with_var_unset("HERALD_TEST_HOOK_SECRET", || {
            let err = build(&entry).execute(&ctx).expect_err("fail");
            assert!(matches!(err, StepError::Declared(ProviderError::Configuration(_))));
            assert!(err.to_string().contains("HERALD_TEST_HOOK_SECRET"));
        });
    }

    #[test]
    fn missing_url_is_rejected_by_factory() {
        let entry = ProviderEntry::new("webhook");
        let err = match factory(entry.descriptor(Category::Announce, "hook"), &entry) {
            Ok(_) => panic!("factory must fail"),
            Err(err) => err,
        };
        assert!(format!("{err:#}").contains("url"));
    }

    fn run_once(dry_run: bool, url: &str) -> (Vec<(StepPhase, String)>, Vec<String>) {
        use crate::engine::Engine;
        use crate::lifecycle::{EventBus, LifecycleEvent, StepListener};

        struct Phases(Arc<Mutex<Vec<(StepPhase, String)>>>);
        impl StepListener for Phases {
            fn name(&self) -> &str {
                "phases"
            }
            fn on_step(
                &self,
                event: &LifecycleEvent,
                _ctx: &ExecutionContext,
            ) -> Result<(), crate::error::ListenerError> {
                self.0.lock().expect("lock").push((event.phase, event.step.clone()));
                Ok(())
            }
        }

        let td = tempdir().expect("tempdir");
        let reporter = CollectingReporter::default();
        let ctx = ExecutionContext::new(
            herald_types::ProjectInfo::new("demo", "1.0.0"),
            td.path(),
            td.path().join("out"),
            Box::new(reporter.clone()),
        )
        .with_dry_run(dry_run);

        let mut config = herald_config::Config::new();
        config.announce.insert("hook".into(), entry(url));
        let registry = crate::providers::builtin_registry();
        let phases = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new().with_listener(Box::new(Phases(Arc::clone(&phases))));

        Engine::new(&config, &registry, &bus)
            .run(Category::Announce, &[], &[], &ctx)
            .expect("run");

        let lines = reporter
            .messages(Level::Info)
            .into_iter()
            .map(|l| {
                l.replace("[dry-run] ", "")
                    .replace(url.trim_end_matches("/hook"), "<origin>")
            })
            .collect();
        let phases = phases.lock().expect("lock").clone();
        (phases, lines)
    }

    #[test]
    fn dry_run_has_live_shape_without_sending() {
        let (url, bodies, handle) = serve_once(200);
        let (live_phases, live_lines) = run_once(false, &url);
        handle.join().expect("join");
        assert_eq!(bodies.lock().expect("lock").len(), 1);

        let (url, bodies, handle) = serve_once(200);
        let (dry_phases, dry_lines) = run_once(true, &url);
        handle.join().expect("join");
        assert!(bodies.lock().expect("lock").is_empty());

        assert_eq!(dry_phases, live_phases);
        assert_eq!(
            dry_phases,
            [(StepPhase::Before, "hook".to_string()), (StepPhase::Success, "hook".to_string())]
        );
        assert_eq!(dry_lines, live_lines);
    }
}
