//! End-to-end authorization flow against a mock identity platform.
//!
//! The "browser" is a [`ConsentPrompt`] that immediately follows the redirect back
//! to the local listener, so the whole code exchange runs offline.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mail_insight::provider::{GmailSettings, OutlookSettings, Provider};
use mail_insight::{Authenticator, ConsentPrompt, CredentialStore, ErrorCategory, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Plays the user: approves consent and lets the provider redirect with `code`.
struct RedirectingBrowser {
    code: Option<&'static str>,
    visits: AtomicUsize,
}

impl RedirectingBrowser {
    fn approving(code: &'static str) -> Arc<Self> {
        Arc::new(Self {
            code: Some(code),
            visits: AtomicUsize::new(0),
        })
    }

    fn denying() -> Arc<Self> {
        Arc::new(Self {
            code: None,
            visits: AtomicUsize::new(0),
        })
    }

    fn visits(&self) -> usize {
        self.visits.load(Ordering::SeqCst)
    }
}

impl ConsentPrompt for RedirectingBrowser {
    fn present(&self, url: &Url) -> Result<()> {
        self.visits.fetch_add(1, Ordering::SeqCst);

        let redirect = url
            .query_pairs()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| Url::parse(&v).unwrap())
            .expect("consent URL carries redirect_uri");
        let port = redirect.port().expect("redirect URI has a port");

        let target = match self.code {
            Some(code) => format!("/?code={code}&state=xyz"),
            None => "/?error=access_denied".to_string(),
        };

        tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .unwrap();
            let request = format!("GET {target} HTTP/1.1\r\nHost: localhost:{port}\r\n\r\n");
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut response = Vec::new();
            let _ = stream.read_to_end(&mut response).await;
        });
        Ok(())
    }
}

fn id_token(upn: &str) -> String {
    let claims = serde_json::json!({ "upn": upn, "tid": "contoso" });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("eyJhbGciOiJub25lIn0.{payload}.sig")
}

fn authenticator(provider: Provider, credential_path: &std::path::Path) -> Authenticator {
    let http = reqwest::Client::new();
    let oauth = provider.oauth_client(http.clone()).unwrap();
    let store = CredentialStore::new(credential_path, oauth);
    Authenticator::new(provider, store, http, 0, Duration::from_secs(5))
}

// ─────────────────────────────────────────────────────────────────────────────
// Outlook
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_outlook_interactive_then_silent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "Bearer",
            "access_token": "EwB0A8l6",
            "refresh_token": "M.R3_BAY",
            "expires_in": 3599,
            "scope": "https://outlook.office.com/IMAP.AccessAsUser.All offline_access",
            "id_token": id_token("bob@contoso.com")
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let credential_path = dir.path().join("msal_token.json");
    let provider = Provider::Outlook(
        OutlookSettings::new("cid", "contoso")
            .unwrap()
            .with_authority(server.uri()),
    );

    let browser = RedirectingBrowser::approving("abc");
    let assertion = authenticator(provider.clone(), &credential_path)
        .with_consent_prompt(browser.clone())
        .authenticate()
        .await
        .unwrap();

    assert_eq!(
        assertion.as_str(),
        "user=bob@contoso.com\x01auth=Bearer EwB0A8l6\x01\x01"
    );
    assert_eq!(browser.visits(), 1);

    let saved = std::fs::read_to_string(&credential_path).unwrap();
    assert!(saved.contains("bob@contoso.com"));
    assert!(saved.contains("M.R3_BAY"));

    // Second run: cached credential, no consent, no token request
    let again = authenticator(provider, &credential_path)
        .with_consent_prompt(browser.clone())
        .authenticate()
        .await
        .unwrap();

    assert_eq!(again.account(), "bob@contoso.com");
    assert_eq!(browser.visits(), 1);
}

#[tokio::test]
async fn test_outlook_denied_consent() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Provider::Outlook(
        OutlookSettings::new("cid", "contoso")
            .unwrap()
            .with_authority("http://127.0.0.1:9"),
    );

    let err = authenticator(provider, &dir.path().join("msal_token.json"))
        .with_consent_prompt(RedirectingBrowser::denying())
        .authenticate()
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Authentication);
    assert!(!dir.path().join("msal_token.json").exists());
}

#[tokio::test]
async fn test_rejected_code_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "AADSTS70000: The provided authorization code is invalid"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let credential_path = dir.path().join("msal_token.json");
    let provider = Provider::Outlook(
        OutlookSettings::new("cid", "contoso")
            .unwrap()
            .with_authority(server.uri()),
    );

    let err = authenticator(provider, &credential_path)
        .with_consent_prompt(RedirectingBrowser::approving("stale"))
        .authenticate()
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Authentication);
    assert!(!credential_path.exists());
}

// ─────────────────────────────────────────────────────────────────────────────
// Gmail
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gmail_account_from_profile() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("client_secret=gsecret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.a0Af",
            "refresh_token": "1//0g",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/profile"))
        .and(header("authorization", "Bearer ya29.a0Af"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "emailAddress": "alice@gmail.com",
            "messagesTotal": 1204
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = GmailSettings::new("gid", "gsecret")
        .unwrap()
        .with_profile_uri(format!("{}/gmail/v1/users/me/profile", server.uri()));
    settings.auth_uri = format!("{}/auth", server.uri());
    settings.token_uri = format!("{}/token", server.uri());

    let dir = tempfile::tempdir().unwrap();
    let assertion = authenticator(Provider::Gmail(settings), &dir.path().join("token.json"))
        .with_consent_prompt(RedirectingBrowser::approving("4/0AX"))
        .authenticate()
        .await
        .unwrap();

    assert_eq!(assertion.account(), "alice@gmail.com");
    assert_eq!(
        assertion.as_str(),
        "user=alice@gmail.com\x01auth=Bearer ya29.a0Af\x01\x01"
    );
}
