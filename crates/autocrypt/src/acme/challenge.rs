//! HTTP-01 challenge responder
//!
//! Serves a single key authorization at
//! `/.well-known/acme-challenge/<token>` for the lifetime of one
//! authorization attempt.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use super::error::AcmeError;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Request path the CA fetches for `token`
pub fn challenge_path(token: &str) -> String {
    format!("{}{}", ACME_CHALLENGE_PREFIX, token)
}

/// Pause after a failed accept, e.g. on descriptor exhaustion
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct Expected {
    path: String,
    body: Bytes,
}

/// Responder for one pending HTTP-01 challenge
///
/// Answers `200` with the key authorization for the exact challenge path
/// and `404` for anything else. The listener lives exactly as long as this
/// value: [`shutdown`](Self::shutdown) releases it and waits for the port
/// to be free, dropping the responder aborts the server task.
#[derive(Debug)]
pub struct ChallengeResponder {
    local_addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl ChallengeResponder {
    /// Bind `addr` and start serving `body` at `path`
    ///
    /// # Errors
    ///
    /// Returns [`AcmeError::ListenerBind`] if the address is unavailable,
    /// e.g. because another responder still holds the port.
    pub async fn bind(
        addr: SocketAddr,
        path: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, AcmeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AcmeError::ListenerBind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| AcmeError::ListenerBind { addr, source })?;

        let expected = Arc::new(Expected {
            path: path.into(),
            body: Bytes::from(body.into()),
        });

        info!(
            addr = %local_addr,
            path = %expected.path,
            "Serving ACME HTTP-01 challenge"
        );

        let task = tokio::spawn(serve(listener, expected));

        Ok(Self {
            local_addr,
            task: Some(task),
        })
    }

    /// Address the responder is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop serving and wait until the listener is closed
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!(addr = %self.local_addr, "Stopped ACME challenge responder");
        }
    }
}

impl Drop for ChallengeResponder {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(addr = %self.local_addr, "Aborted ACME challenge responder");
        }
    }
}

async fn serve(listener: TcpListener, expected: Arc<Expected>) {
    // Dropping the set on abort tears down in-flight connections as well
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!(peer = %peer, "Accepted challenge connection");
                    let expected = Arc::clone(&expected);
                    connections.spawn(async move {
                        let service = service_fn(move |req| {
                            let response = respond(&expected, &req);
                            async move { Ok::<_, Infallible>(response) }
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!(peer = %peer, error = %e, "Challenge connection error");
                        }
                    });
                }
                Err(e) => accept_failed(&e).await,
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn accept_failed(error: &std::io::Error) {
    warn!(error = %error, "Failed to accept challenge connection");
    sleep(ACCEPT_ERROR_BACKOFF).await;
}

fn respond(expected: &Expected, req: &Request<Incoming>) -> Response<Full<Bytes>> {
    let path = req.uri().path();

    if path != expected.path {
        warn!(path = %path, "Unknown request path on challenge responder");
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }

    debug!(path = %path, "Answering ACME HTTP-01 challenge");
    let mut response = Response::new(Full::new(expected.body.clone()));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA";
    const KEY_AUTH: &str =
        "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA.9jg46WB3rR_AHD-EBXdN7cBkH1WOu0tA3M9fm21mqTI";

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_error_backs_off() {
        let started = tokio::time::Instant::now();
        accept_failed(&std::io::Error::other("too many open files")).await;
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }

    #[test]
    fn test_challenge_path() {
        assert_eq!(
            challenge_path("abc123"),
            "/.well-known/acme-challenge/abc123"
        );
    }

    #[tokio::test]
    async fn test_serves_exact_path_only() {
        let responder = ChallengeResponder::bind(loopback(), challenge_path(TOKEN), KEY_AUTH)
            .await
            .unwrap();
        let base = format!("http://{}", responder.local_addr());

        let ok = reqwest::get(format!("{}{}", base, challenge_path(TOKEN)))
            .await
            .unwrap();
        assert_eq!(ok.status().as_u16(), 200);
        assert_eq!(ok.text().await.unwrap(), KEY_AUTH);

        for other in [
            "/".to_string(),
            challenge_path("other-token"),
            format!("{}/extra", challenge_path(TOKEN)),
            ACME_CHALLENGE_PREFIX.to_string(),
        ] {
            let response = reqwest::get(format!("{}{}", base, other)).await.unwrap();
            assert_eq!(response.status().as_u16(), 404, "path {other}");
        }

        responder.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_port() {
        let first = ChallengeResponder::bind(loopback(), challenge_path(TOKEN), KEY_AUTH)
            .await
            .unwrap();
        let addr = first.local_addr();

        first.shutdown().await;

        let second = ChallengeResponder::bind(addr, challenge_path(TOKEN), KEY_AUTH)
            .await
            .unwrap();
        assert_eq!(second.local_addr(), addr);
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = ChallengeResponder::bind(loopback(), challenge_path(TOKEN), KEY_AUTH)
            .await
            .unwrap();

        let result = ChallengeResponder::bind(first.local_addr(), challenge_path(TOKEN), KEY_AUTH).await;
        assert!(matches!(result, Err(AcmeError::ListenerBind { .. })));

        first.shutdown().await;
    }
}
