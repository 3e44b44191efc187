//! Internal IMAP session management.
//!
//! This module wraps async-imap operations with proper error handling.

use crate::auth::BearerAssertion;
use crate::connection::TlsStream;
use crate::error::{Error, Result};
use async_imap::Session;
use futures::StreamExt;
use tracing::{debug, instrument};

/// Type alias for IMAP session over TLS.
pub(crate) type ImapSession = Session<TlsStream>;

/// SASL XOAUTH2 responder.
///
/// The assertion goes out on the first challenge. A second challenge carries the
/// server's JSON error report; answering it with an empty line lets the server
/// finish with a tagged NO instead of hanging.
struct XOAuth2<'a> {
    assertion: &'a BearerAssertion,
    sent: bool,
}

impl async_imap::Authenticator for XOAuth2<'_> {
    type Response = Vec<u8>;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        if self.sent {
            Vec::new()
        } else {
            self.sent = true;
            self.assertion.as_str().as_bytes().to_vec()
        }
    }
}

/// Authenticates to the IMAP server with XOAUTH2 and returns a session.
#[instrument(
    name = "session::authenticate",
    skip_all,
    fields(account = %assertion.account())
)]
pub(crate) async fn authenticate(
    tls_stream: TlsStream,
    assertion: &BearerAssertion,
) -> Result<ImapSession> {
    let mut client = async_imap::Client::new(tls_stream);

    // authenticate() does not consume the untagged greeting the way login() does
    read_greeting(&mut client).await?;

    debug!("Authenticating to IMAP server");

    client
        .authenticate(
            "XOAUTH2",
            XOAuth2 {
                assertion,
                sent: false,
            },
        )
        .await
        .map_err(|(source, _client)| Error::AuthenticationRejected {
            account: assertion.account().to_string(),
            source,
        })
}

async fn read_greeting<T>(client: &mut async_imap::Client<T>) -> Result<()>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + std::fmt::Debug + Send,
{
    match client.read_response().await {
        Some(Ok(_greeting)) => Ok(()),
        None => Err(Error::ImapGreeting {
            message: "connection closed before greeting".into(),
        }),
        Some(Err(e)) => Err(Error::ImapGreeting {
            message: e.to_string(),
        }),
    }
}

/// Selects a mailbox (typically "INBOX").
#[instrument(name = "session::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(session: &mut ImapSession, mailbox: &str) -> Result<u32> {
    debug!("Selecting mailbox");

    let selected = session
        .select(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    Ok(selected.exists)
}

/// Searches the selected mailbox for every message UID, oldest first.
#[instrument(name = "session::search_all", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn search_all(session: &mut ImapSession, mailbox: &str) -> Result<Vec<u32>> {
    let uids = session
        .uid_search("ALL")
        .await
        .map_err(|source| Error::ImapSearch {
            mailbox: mailbox.to_string(),
            source,
        })?;

    // UIDs are assigned in ascending order as messages arrive
    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();

    debug!(uid_count = uids.len(), "Found messages");

    Ok(uids)
}

/// Fetches the full RFC 822 envelope of one message by UID.
///
/// Returns `None` if the server answered without a body for that UID.
#[instrument(name = "session::fetch_one", skip(session))]
pub(crate) async fn fetch_one(session: &mut ImapSession, uid: u32) -> Result<Option<Vec<u8>>> {
    let fetch_err = |source| Error::ImapFetch {
        identifier: uid.to_string(),
        source,
    };

    let mut stream = session
        .uid_fetch(uid.to_string(), "BODY.PEEK[]")
        .await
        .map_err(fetch_err)?
        .boxed();

    // Drain the whole response so the session is ready for the next command
    let mut responses = Vec::new();
    while let Some(item) = stream.next().await {
        let fetch = item.map_err(fetch_err)?;
        responses.push((fetch.uid, fetch.body().map(<[u8]>::to_vec)));
    }

    let body = body_for_uid(responses, uid);
    debug!(found = body.is_some(), "Fetched message");

    Ok(body)
}

/// Picks the body returned for `uid`. FETCH responses for other messages (left
/// over from an interrupted command, or unsolicited) are ignored.
fn body_for_uid(responses: Vec<(Option<u32>, Option<Vec<u8>>)>, uid: u32) -> Option<Vec<u8>> {
    responses.into_iter().find_map(|(answered, body)| {
        if answered == Some(uid) {
            body
        } else {
            debug!(?answered, requested = uid, "Ignoring FETCH response for another message");
            None
        }
    })
}

/// Logs out from IMAP session.
#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })?;

    Ok(())
}
