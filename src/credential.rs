//! Persisted OAuth2 credentials.
//!
//! A [`CredentialStore`] is the sole reader and writer of one provider's credential
//! file. [`CredentialStore::load`] hands out a credential only if it is usable right
//! now, refreshing it silently when it has expired and a refresh token is available.
//!
//! The file is a single JSON record rewritten as a whole on every save. Writes go to a
//! temporary file in the same directory which is then renamed over the target, so a
//! crash mid-write leaves the previous record intact.

use crate::error::{Error, Result};
use crate::oauth::{OAuthClient, TokenSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Credentials this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// OpenID Connect scopes that token endpoints do not reliably echo back.
const RESERVED_SCOPES: &[&str] = &["openid", "profile", "email", "offline_access"];

/// Parses a space-separated `scope` field from a token response.
fn parse_scope(scope: Option<&str>) -> BTreeSet<String> {
    scope
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// An OAuth2 token record for one mailbox account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token for silent renewal.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Instant the access token stops being accepted.
    pub expiry: DateTime<Utc>,
    /// Scopes the grant was issued for.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// Mailbox account (email address) the token belongs to.
    pub account: String,
}

impl Credential {
    /// Builds a credential from a freshly issued token set.
    ///
    /// Records the scopes the provider reports as granted, or `scopes` if it reports none.
    #[must_use]
    pub fn from_tokens(tokens: TokenSet, scopes: &[String], account: impl Into<String>) -> Self {
        let expiry = tokens.expiry_from(Utc::now());
        let mut granted = parse_scope(tokens.scope.as_deref());
        if granted.is_empty() {
            granted = scopes.iter().cloned().collect();
        }
        Self {
            scopes: granted,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expiry,
            account: account.into(),
        }
    }

    /// Returns `true` if the access token is still usable at `now`.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now + chrono::Duration::seconds(EXPIRY_SKEW_SECS)
    }

    /// Returns `true` if every requested scope was granted.
    ///
    /// OpenID Connect scopes are not compared.
    #[must_use]
    pub fn covers(&self, scopes: &[String]) -> bool {
        scopes
            .iter()
            .filter(|s| !RESERVED_SCOPES.contains(&s.as_str()))
            .all(|s| self.scopes.contains(s))
    }

    /// Applies a refresh response. Providers may omit the refresh token on refresh,
    /// in which case the existing one is kept.
    #[must_use]
    fn refreshed(mut self, tokens: TokenSet) -> Self {
        self.expiry = tokens.expiry_from(Utc::now());
        self.access_token = tokens.access_token;
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token;
        }
        let granted = parse_scope(tokens.scope.as_deref());
        if !granted.is_empty() {
            self.scopes = granted;
        }
        self
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry", &self.expiry)
            .field("scopes", &self.scopes)
            .field("account", &self.account)
            .finish()
    }
}

/// Loads, saves, and refreshes the credential file of one provider.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    oauth: OAuthClient,
}

impl CredentialStore {
    /// Creates a store for the credential file at `path`, refreshing through `oauth`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, oauth: OAuthClient) -> Self {
        Self {
            path: path.into(),
            oauth,
        }
    }

    /// Returns the credential file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a credential that is valid right now, or `None`.
    ///
    /// - A missing file, unreadable record, or scope mismatch yields `None`.
    /// - A fresh credential is returned without touching the network.
    /// - An expired credential with a refresh token is refreshed once, persisted,
    ///   and returned. If the refresh fails for any reason, `None` is returned so
    ///   the caller falls back to interactive authorization.
    #[instrument(name = "credential::load", skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self, scopes: &[String]) -> Option<Credential> {
        let credential = match self.read().await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!("No cached credential");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cached credential");
                return None;
            }
        };

        if !credential.covers(scopes) {
            info!(
                granted = ?credential.scopes,
                "Cached credential does not cover requested scopes"
            );
            return None;
        }

        if credential.is_fresh_at(Utc::now()) {
            debug!(account = %credential.account, expiry = %credential.expiry, "Using cached credential");
            return Some(credential);
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            info!(account = %credential.account, "Cached credential expired without refresh token");
            return None;
        };

        match self.oauth.refresh(&refresh_token, scopes).await {
            Ok(tokens) => {
                let refreshed = credential.refreshed(tokens);
                if let Err(e) = self.save(&refreshed).await {
                    warn!(error = %e, "Refreshed credential could not be persisted");
                }
                debug!(account = %refreshed.account, expiry = %refreshed.expiry, "Refreshed credential");
                Some(refreshed)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    outcome = "refresh_failed",
                    "Silent refresh failed, interactive authorization required"
                );
                None
            }
        }
    }

    /// Overwrites the credential file with `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialWrite`] if the file cannot be written.
    #[instrument(name = "credential::save", skip_all, fields(path = %self.path.display()))]
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_vec_pretty(credential).map_err(|source| {
            Error::CredentialFormat {
                path: self.path.clone(),
                source,
            }
        })?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&path, &json))
            .await
            .map_err(|join| Error::CredentialWrite {
                path: self.path.clone(),
                source: std::io::Error::other(join),
            })??;

        debug!(account = %credential.account, "Credential saved");
        Ok(())
    }

    /// Deletes the credential file, forcing the next authentication to be interactive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialWrite`] if an existing file cannot be removed.
    pub async fn discard(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Discarded cached credential");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::CredentialWrite {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn read(&self) -> Result<Option<Credential>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(Error::CredentialRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| Error::CredentialFormat {
                path: self.path.clone(),
                source,
            })
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let write_err = |source| Error::CredentialWrite {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    restrict_permissions(tmp.as_file()).map_err(write_err)?;
    tmp.write_all(contents).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}
