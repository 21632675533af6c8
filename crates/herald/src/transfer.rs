//! HTTP plumbing shared by the uploader and the staging client.

use std::fs::File;
use std::path::Path;

use herald_retry::RetryExecutor;
use herald_webhook::is_transient_status;
use reqwest::blocking::{Client, RequestBuilder, Response};

use crate::error::ProviderError;
use crate::stream::{SharedGuard, UploadStreamGuard};

pub(crate) const USER_AGENT: &str = concat!("herald/", env!("CARGO_PKG_VERSION"));

/// Credentials attached to outgoing requests.
#[derive(Debug, Clone, Default)]
pub(crate) enum Auth {
    #[default]
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

impl Auth {
    pub(crate) fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }
}

pub(crate) fn build_client(
    connect_timeout: std::time::Duration,
    read_timeout: std::time::Duration,
) -> Result<Client, ProviderError> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ProviderError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Classify a transport failure for `target`.
pub(crate) fn transport_error(target: &str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() {
        ProviderError::TransientRemote(format!("{target}: {err}"))
    } else {
        ProviderError::PermanentRemote(format!("{target}: {err}"))
    }
}

/// Turn a non-2xx response into a classified error.
pub(crate) fn check_status(target: &str, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let message = format!("{target} returned {status}: {}", body.trim());
    if is_transient_status(status.as_u16()) {
        Err(ProviderError::TransientRemote(message))
    } else {
        Err(ProviderError::PermanentRemote(message))
    }
}

/// PUT a file to `url`, retrying transient failures.
///
/// The file is read once through an [`UploadStreamGuard`]; each retry rewinds
/// the guard instead of re-opening the file. A file larger than the guard's
/// capacity is sent once, and a retry then fails with an `Io` error.
pub(crate) fn put_file(
    client: &Client,
    url: &str,
    path: &Path,
    auth: &Auth,
    retry: &RetryExecutor,
) -> Result<(), ProviderError> {
    let file = File::open(path)
        .map_err(|e| ProviderError::io(format!("failed to open {}", path.display()), e))?;
    let len = file
        .metadata()
        .map_err(|e| ProviderError::io(format!("failed to stat {}", path.display()), e))?
        .len();
    let guard = SharedGuard::new(UploadStreamGuard::new(file));

    retry.run_if(
        |attempt| {
            if attempt > 1 {
                let sent = guard.position().unwrap_or_default();
                guard.reset().map_err(|e| {
                    ProviderError::io(
                        format!("cannot retry upload of {} after {sent} bytes", path.display()),
                        e,
                    )
                })?;
            }
            let body = reqwest::blocking::Body::sized(guard.clone(), len);
            let response = auth
                .apply(client.put(url))
                .body(body)
                .send()
                .map_err(|e| transport_error(url, e))?;
            check_status(url, response).map(drop)
        },
        ProviderError::is_transient,
    )
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use herald_retry::{RetryStrategyConfig, RetryStrategyType};
    use tempfile::tempdir;
    use tiny_http::{Response, Server, StatusCode};

    use super::*;

    fn immediate(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        })
    }

    /// Serve `statuses` in order, recording each request body and auth header.
    fn spawn(statuses: Vec<u16>) -> (String, Arc<Mutex<Vec<(Vec<u8>, Option<String>)>>>, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").expect("server");
        let url = format!("http://{}/files/a.bin", server.server_addr());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_thread = Arc::clone(&seen);
        let handle = thread::spawn(move || {
            for status in statuses {
                let mut req = server.recv().expect("request");
                let mut body = Vec::new();
                req.as_reader().read_to_end(&mut body).expect("body");
                let auth = req
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_string());
                seen_thread.lock().expect("lock").push((body, auth));
                req.respond(Response::empty(StatusCode(status))).expect("respond");
            }
        });
        (url, seen, handle)
    }

    fn client() -> Client {
        build_client(Duration::from_secs(5), Duration::from_secs(5)).expect("client")
    }

    #[test]
    fn transient_failure_is_retried_with_same_bytes() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("a.bin");
        std::fs::write(&path, b"artifact bytes").expect("write");

        let (url, seen, handle) = spawn(vec![503, 201]);
        put_file(&client(), &url, &path, &Auth::Bearer("t0k".into()), &immediate(3))
            .expect("upload");
        handle.join().expect("join");

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, b"artifact bytes");
        assert_eq!(seen[1].0, b"artifact bytes");
        assert_eq!(seen[1].1.as_deref(), Some("Bearer t0k"));
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("a.bin");
        std::fs::write(&path, b"x").expect("write");

        let (url, seen, handle) = spawn(vec![403]);
        let err = put_file(&client(), &url, &path, &Auth::None, &immediate(3)).expect_err("fail");
        handle.join().expect("join");

        assert!(matches!(err, ProviderError::PermanentRemote(_)));
        assert!(err.to_string().contains("403"));
        assert_eq!(seen.lock().expect("lock").len(), 1);
    }

    #[test]
    fn oversized_file_cannot_be_retried() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("big.bin");
        let len = crate::stream::DEFAULT_CAPACITY + 1024;
        std::fs::write(&path, vec![7u8; len]).expect("write");

        let (url, seen, handle) = spawn(vec![500]);
        let err = put_file(&client(), &url, &path, &Auth::None, &immediate(3)).expect_err("fail");
        handle.join().expect("join");

        assert!(matches!(err, ProviderError::Io { .. }));
        assert!(err.to_string().contains("big.bin"));
        assert!(err.to_string().contains(&format!("after {len} bytes")));
        assert_eq!(seen.lock().expect("lock").len(), 1);
    }

    #[test]
    fn missing_file_is_io_error_naming_path() {
        let td = tempdir().expect("tempdir");
        let err = put_file(
            &client(),
            "http://127.0.0.1:9/x",
            &td.path().join("absent.bin"),
            &Auth::None,
            &immediate(1),
        )
        .expect_err("fail");
        assert!(err.to_string().contains("absent.bin"));
    }
}
