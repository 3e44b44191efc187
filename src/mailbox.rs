//! Authenticated IMAP session exposing message enumeration and retrieval.
//!
//! [`MailSession`] is the production [`MailSource`]. Protocol failures on
//! [`enumerate`](MailSource::enumerate) and [`fetch`](MailSource::fetch) are soft:
//! they are logged and surface as an empty list or a missing message, never as an
//! error that would end the batch.
//!
//! # Example
//!
//! ```no_run
//! use mail_insight::auth::BearerAssertion;
//! use mail_insight::mailbox::{MailSession, MailSource};
//! use mail_insight::provider::MailEndpoint;
//! use mail_insight::TimeoutConfig;
//!
//! # async fn example() -> mail_insight::Result<()> {
//! let assertion = BearerAssertion::new("user@gmail.com", "ya29.a0...");
//! let endpoint = MailEndpoint::new("imap.gmail.com", 993);
//!
//! let mut session = MailSession::open(&assertion, &endpoint, &TimeoutConfig::default()).await?;
//! for id in session.enumerate("INBOX", 10).await {
//!     if let Some(raw) = session.fetch(&id).await {
//!         println!("{}: {} bytes", raw.identifier, raw.envelope.len());
//!     }
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::auth::BearerAssertion;
use crate::config::TimeoutConfig;
use crate::connection;
use crate::error::{Error, Result};
use crate::provider::MailEndpoint;
use crate::session::{self, ImapSession};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// A fetched message before MIME decoding.
#[derive(Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Server-assigned identifier (IMAP UID).
    pub identifier: String,
    /// Full RFC 822 message bytes.
    pub envelope: Vec<u8>,
}

impl std::fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMessage")
            .field("identifier", &self.identifier)
            .field("envelope_len", &self.envelope.len())
            .finish()
    }
}

/// A source of messages for the pipeline.
#[async_trait]
pub trait MailSource: Send {
    /// Returns at most the last `limit` identifiers in `folder`, oldest first.
    ///
    /// Protocol failures yield an empty list.
    async fn enumerate(&mut self, folder: &str, limit: usize) -> Vec<String>;

    /// Retrieves one message. Protocol failures yield `None`.
    async fn fetch(&mut self, identifier: &str) -> Option<RawMessage>;

    /// Releases the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server did not acknowledge the logout. The connection
    /// is released either way.
    async fn close(&mut self) -> Result<()>;
}

/// Keeps the last `limit` entries of `ids`, preserving order.
pub(crate) fn take_last<T>(mut ids: Vec<T>, limit: usize) -> Vec<T> {
    let excess = ids.len().saturating_sub(limit);
    ids.drain(..excess);
    ids
}

fn parse_uid(identifier: &str) -> Result<u32> {
    identifier
        .parse()
        .map_err(|_| Error::InvalidIdentifier {
            identifier: identifier.to_string(),
        })
}

/// Whether `err` interrupted a command whose responses may still arrive.
///
/// The stream can then no longer be matched to later commands.
fn desynchronizes(err: &Error) -> bool {
    matches!(
        err,
        Error::SelectTimeout { .. } | Error::SearchTimeout { .. } | Error::FetchTimeout { .. }
    )
}

/// IMAP session authenticated with an XOAUTH2 bearer assertion.
///
/// Call [`close`](MailSource::close) when done. A session dropped without closing
/// spawns a bounded logout on the current tokio runtime.
pub struct MailSession {
    session: Option<Box<ImapSession>>,
    account: String,
    imap_host: String,
    timeouts: TimeoutConfig,
}

impl MailSession {
    /// Connects to `endpoint` over TLS and authenticates with `assertion`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectTimeout`], [`Error::TcpConnect`], [`Error::TlsConnect`] on
    ///   connection problems
    /// - [`Error::AuthenticationRejected`] if the server declines the assertion
    /// - [`Error::AuthTimeout`] if authentication does not complete in time
    #[instrument(
        name = "MailSession::open",
        skip_all,
        fields(account = %assertion.account(), imap_host = %endpoint.host)
    )]
    pub async fn open(
        assertion: &BearerAssertion,
        endpoint: &MailEndpoint,
        timeouts: &TimeoutConfig,
    ) -> Result<Self> {
        let tls_stream = tokio::time::timeout(
            timeouts.connect,
            connection::establish_tls_connection(endpoint),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: endpoint.address(),
            timeout: timeouts.connect,
        })??;

        debug!("TLS connection established");

        let session = tokio::time::timeout(
            timeouts.auth,
            session::authenticate(tls_stream, assertion),
        )
        .await
        .map_err(|_| Error::AuthTimeout {
            account: assertion.account().to_string(),
            timeout: timeouts.auth,
        })??;

        debug!("Authenticated");

        Ok(Self {
            session: Some(Box::new(session)),
            account: assertion.account().to_string(),
            imap_host: endpoint.host.clone(),
            timeouts: timeouts.clone(),
        })
    }

    /// Returns the authenticated account.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Returns `true` until [`close`](MailSource::close) has been called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    async fn try_enumerate(&mut self, folder: &str, limit: usize) -> Result<Vec<String>> {
        let result = self.select_and_search(folder, limit).await;
        self.discard_if_desynchronized(&result);
        result
    }

    async fn select_and_search(&mut self, folder: &str, limit: usize) -> Result<Vec<String>> {
        let timeouts = self.timeouts.clone();
        let imap = self.session_mut()?;

        let exists = tokio::time::timeout(timeouts.select, session::select_mailbox(imap, folder))
            .await
            .map_err(|_| Error::SelectTimeout {
                mailbox: folder.to_string(),
                timeout: timeouts.select,
            })??;

        debug!(exists, "Selected folder");

        let uids = tokio::time::timeout(timeouts.search, session::search_all(imap, folder))
            .await
            .map_err(|_| Error::SearchTimeout {
                mailbox: folder.to_string(),
                timeout: timeouts.search,
            })??;

        Ok(take_last(uids, limit)
            .into_iter()
            .map(|uid| uid.to_string())
            .collect())
    }

    async fn try_fetch(&mut self, identifier: &str) -> Result<RawMessage> {
        let uid = parse_uid(identifier)?;
        let result = self.fetch_uid(uid).await;
        self.discard_if_desynchronized(&result);

        Ok(RawMessage {
            identifier: identifier.to_string(),
            envelope: result?,
        })
    }

    async fn fetch_uid(&mut self, uid: u32) -> Result<Vec<u8>> {
        let timeout = self.timeouts.message_fetch;
        let imap = self.session_mut()?;

        tokio::time::timeout(timeout, session::fetch_one(imap, uid))
            .await
            .map_err(|_| Error::FetchTimeout {
                identifier: uid.to_string(),
                timeout,
            })??
            .ok_or_else(|| Error::EmptyFetch {
                identifier: uid.to_string(),
            })
    }

    /// Drops the connection after a command was abandoned mid-response.
    fn discard_if_desynchronized<T>(&mut self, result: &Result<T>) {
        if let Err(e) = result {
            if desynchronizes(e) && self.session.take().is_some() {
                warn!(
                    error = %e,
                    outcome = "session_discarded",
                    "Abandoned IMAP command left unread responses, closing session"
                );
            }
        }
    }

    fn session_mut(&mut self) -> Result<&mut ImapSession> {
        self.session.as_deref_mut().ok_or(Error::SessionClosed)
    }
}

#[async_trait]
impl MailSource for MailSession {
    #[instrument(name = "MailSession::enumerate", skip(self), fields(imap_host = %self.imap_host))]
    async fn enumerate(&mut self, folder: &str, limit: usize) -> Vec<String> {
        match self.try_enumerate(folder, limit).await {
            Ok(ids) => {
                debug!(count = ids.len(), "Enumerated messages");
                ids
            }
            Err(e) => {
                warn!(
                    error = %e,
                    category = %e.category(),
                    outcome = "enumerate_failed",
                    "Folder enumeration failed, treating folder as empty"
                );
                Vec::new()
            }
        }
    }

    #[instrument(name = "MailSession::fetch", skip(self), fields(imap_host = %self.imap_host))]
    async fn fetch(&mut self, identifier: &str) -> Option<RawMessage> {
        match self.try_fetch(identifier).await {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(
                    error = %e,
                    category = %e.category(),
                    outcome = "fetch_failed",
                    "Message fetch failed, skipping"
                );
                None
            }
        }
    }

    #[instrument(name = "MailSession::close", skip(self), fields(imap_host = %self.imap_host))]
    async fn close(&mut self) -> Result<()> {
        let Some(mut imap) = self.session.take() else {
            return Ok(());
        };

        let timeout = self.timeouts.logout;
        tokio::time::timeout(timeout, session::logout(&mut imap))
            .await
            .map_err(|_| Error::LogoutTimeout { timeout })?
    }
}

impl Drop for MailSession {
    fn drop(&mut self) {
        let Some(mut imap) = self.session.take() else {
            return;
        };
        let logout_timeout = self.timeouts.logout;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match tokio::time::timeout(logout_timeout, session::logout(&mut imap)).await
                    {
                        Ok(Ok(())) => debug!("Session logged out on drop"),
                        Ok(Err(e)) => warn!(error = %e, "Session logout on drop failed"),
                        Err(_) => warn!(
                            timeout_secs = logout_timeout.as_secs(),
                            "Session logout on drop timed out"
                        ),
                    }
                });
            }
            Err(_) => {
                warn!(
                    "MailSession dropped outside of tokio runtime context. \
                     Connection will be closed without IMAP logout. \
                     Call close().await before dropping."
                );
            }
        }
    }
}

impl std::fmt::Debug for MailSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSession")
            .field("account", &self.account)
            .field("imap_host", &self.imap_host)
            .field("open", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_last_truncates_from_front() {
        assert_eq!(take_last(vec![1, 2, 3, 4, 5], 3), vec![3, 4, 5]);
    }

    #[test]
    fn test_take_last_keeps_short_lists() {
        assert_eq!(take_last(vec![1, 2], 3), vec![1, 2]);
        assert_eq!(take_last(Vec::<u32>::new(), 3), Vec::<u32>::new());
    }

    #[test]
    fn test_take_last_zero_limit() {
        assert!(take_last(vec![1, 2, 3], 0).is_empty());
    }

    #[test]
    fn test_raw_message_debug_omits_content() {
        let raw = RawMessage {
            identifier: "7".into(),
            envelope: b"Subject: private\r\n\r\nsecret body".to_vec(),
        };
        let debug = format!("{raw:?}");
        assert!(!debug.contains("secret body"));
        assert!(debug.contains("envelope_len"));
    }

    #[test]
    fn test_parse_uid() {
        assert_eq!(parse_uid("4021").unwrap(), 4021);
        assert!(matches!(
            parse_uid("1:*"),
            Err(Error::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            parse_uid(""),
            Err(Error::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_abandoned_commands_desynchronize() {
        let timeout = std::time::Duration::from_secs(1);
        assert!(desynchronizes(&Error::FetchTimeout {
            identifier: "7".into(),
            timeout,
        }));
        assert!(desynchronizes(&Error::SelectTimeout {
            mailbox: "INBOX".into(),
            timeout,
        }));
        assert!(desynchronizes(&Error::SearchTimeout {
            mailbox: "INBOX".into(),
            timeout,
        }));

        assert!(!desynchronizes(&Error::EmptyFetch {
            identifier: "7".into()
        }));
        assert!(!desynchronizes(&Error::SessionClosed));
    }

    #[tokio::test]
    async fn test_open_against_closed_port_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let assertion = BearerAssertion::new("alice@example.com", "token");
        let endpoint = MailEndpoint::new("localhost", port);
        let err = MailSession::open(&assertion, &endpoint, &TimeoutConfig::default())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.category(), crate::ErrorCategory::Network);
    }
}
