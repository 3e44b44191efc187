//! One-shot local listener that captures an OAuth2 authorization code.
//!
//! [`start`] binds a loopback port and spawns a task that accepts exactly one
//! connection. That request's `code` query parameter is answered with a short
//! confirmation page and delivered through the returned [`ListenerHandle`]; the
//! socket is closed before the code is handed over, so no further connection is
//! ever served.
//!
//! The listener itself never times out. Callers bound the wait, e.g. with
//! [`tokio::time::timeout`] around [`ListenerHandle::retrieve_code`].

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Upper bound on the request head we are willing to read.
const MAX_REQUEST_BYTES: usize = 16 * 1024;

const CONFIRMATION_BODY: &str =
    "<html><body><h3>Authorization received. You may now close this window.</h3></body></html>";
const MISSING_CODE_BODY: &str =
    "<html><body><h3>No authorization code was received. Return to the application and try again.</h3></body></html>";

/// An authorization code captured from the provider redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    /// The raw code value.
    pub code: String,
    /// When the redirect arrived.
    pub received_at: DateTime<Utc>,
}

impl std::fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("code", &"[REDACTED]")
            .field("received_at", &self.received_at)
            .finish()
    }
}

/// Handle to a running one-shot listener.
///
/// Dropping the handle stops the listener if it has not served its request yet.
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    code_rx: oneshot::Receiver<Option<AuthorizationCode>>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Redirect URI to register with the provider, e.g. `http://127.0.0.1:8080`.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}", self.local_addr.port())
    }

    /// Waits for the redirect and returns its authorization code.
    ///
    /// Resolves to `None` if the single request served carried no `code` or could not
    /// be read. Never resolves if no browser ever reaches the listener.
    pub async fn retrieve_code(mut self) -> Option<AuthorizationCode> {
        (&mut self.code_rx).await.ok().flatten()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Binds a loopback listener on `port` (0 picks a free port) and starts serving one request.
///
/// # Errors
///
/// Returns [`Error::ListenerBind`] if the port cannot be bound.
#[instrument(name = "listener::start", skip_all, fields(port = port))]
pub async fn start(port: u16) -> Result<ListenerHandle> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| Error::ListenerBind {
            addr: addr.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| Error::ListenerBind {
        addr: addr.to_string(),
        source,
    })?;

    let (code_tx, code_rx) = oneshot::channel();
    let task = tokio::spawn(serve_once(listener, code_tx));

    debug!(%local_addr, "Authorization listener started");

    Ok(ListenerHandle {
        local_addr,
        code_rx,
        task,
    })
}

async fn serve_once(listener: TcpListener, code_tx: oneshot::Sender<Option<AuthorizationCode>>) {
    let accepted = listener.accept().await;
    // One request per flow: stop listening before anything else happens
    drop(listener);

    let code = match accepted {
        Ok((stream, peer)) => {
            debug!(%peer, "Authorization redirect connection accepted");
            handle_redirect(stream).await
        }
        Err(e) => {
            warn!(error = %e, "Authorization listener failed to accept");
            None
        }
    };

    // The receiver may be gone if the caller gave up waiting
    let _ = code_tx.send(code);
}

async fn handle_redirect(mut stream: TcpStream) -> Option<AuthorizationCode> {
    let head = match read_request_head(&mut stream).await {
        Ok(head) => head,
        Err(e) => {
            warn!(error = %e, "Failed to read authorization redirect");
            return None;
        }
    };

    let target = request_target(&head);
    let code = target.and_then(|t| query_param(t, "code"));

    let (status, body) = if code.is_some() {
        ("200 OK", CONFIRMATION_BODY)
    } else {
        if let Some(error) = target.and_then(|t| query_param(t, "error")) {
            warn!(error = %error, "Provider redirected without an authorization code");
        } else {
            warn!("Authorization redirect carried no code");
        }
        ("400 Bad Request", MISSING_CODE_BODY)
    };

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!(error = %e, "Failed to answer authorization redirect");
    }
    let _ = stream.shutdown().await;

    code.map(|code| AuthorizationCode {
        code,
        received_at: Utc::now(),
    })
}

async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Extracts the request target from `GET /path?query HTTP/1.1`.
fn request_target(head: &str) -> Option<&str> {
    let request_line = head.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    parts.next()
}

fn query_param(target: &str, name: &str) -> Option<String> {
    let (_, query) = target.split_once('?')?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn send_request(addr: SocketAddr, target: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_query_param_extraction() {
        assert_eq!(
            query_param("/?code=4%2F0Ab&scope=x", "code").as_deref(),
            Some("4/0Ab")
        );
        assert_eq!(query_param("/?state=1&code=abc", "code").as_deref(), Some("abc"));
        assert_eq!(query_param("/?error=access_denied", "code"), None);
        assert_eq!(query_param("/favicon.ico", "code"), None);
        assert_eq!(query_param("/?code=", "code"), None);
    }

    #[test]
    fn test_request_target() {
        assert_eq!(
            request_target("GET /?code=1 HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some("/?code=1")
        );
        assert_eq!(request_target(""), None);
    }

    #[tokio::test]
    async fn test_captures_code_and_confirms() {
        let handle = start(0).await.unwrap();
        let addr = handle.local_addr();

        let response = send_request(addr, "/?code=abc123&scope=ignored").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("You may now close this window"));

        let code = handle.retrieve_code().await.unwrap();
        assert_eq!(code.code, "abc123");
    }

    #[tokio::test]
    async fn test_serves_exactly_one_request() {
        let handle = start(0).await.unwrap();
        let addr = handle.local_addr();

        send_request(addr, "/?code=first").await;
        let code = handle.retrieve_code().await.unwrap();
        assert_eq!(code.code, "first");

        // The socket was closed before the code was delivered
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_request_without_code_yields_none() {
        let handle = start(0).await.unwrap();
        let addr = handle.local_addr();

        let response = send_request(addr, "/?error=access_denied").await;
        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(handle.retrieve_code().await.is_none());
    }

    #[tokio::test]
    async fn test_wait_is_unbounded_without_caller_deadline() {
        let handle = start(0).await.unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), handle.retrieve_code()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_instances_do_not_share_codes() {
        let first = start(0).await.unwrap();
        let second = start(0).await.unwrap();

        send_request(second.local_addr(), "/?code=two").await;
        send_request(first.local_addr(), "/?code=one").await;

        assert_eq!(first.retrieve_code().await.unwrap().code, "one");
        assert_eq!(second.retrieve_code().await.unwrap().code, "two");
    }

    #[test]
    fn test_redirect_uri_uses_bound_port() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let handle = start(0).await.unwrap();
            let port = handle.local_addr().port();
            assert_eq!(handle.redirect_uri(), format!("http://127.0.0.1:{port}"));
        });
    }
}
