use std::fs;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::debug;
use serde::Serialize;

use crate::config::Credential;
use crate::error::{ApiError, ExporterError};
use crate::util;

use super::endpoint::RemoteEndpoint;
use super::models::InstallationToken;

/// Installation tokens are renewed this long before they expire.
const TOKEN_RENEW_MARGIN_SECS: i64 = 60;

/// Authenticator turns the process credential into a bearer token
/// for every request.
///
/// - `Token`: the configured token, used as is
/// - `Installation`: an app JWT exchanged for a short-lived
///   installation token, cached until shortly before expiry
pub enum Authenticator {
    Token(String),
    Installation(InstallationAuth),
}

impl Authenticator {
    /// Builds the authenticator. Performs no network I/O.
    ///
    /// An unreadable or unparseable private key is an
    /// `AuthenticationError`.
    pub fn from_credential(
        credential: &Credential,
        endpoint: &RemoteEndpoint,
    ) -> Result<Self, ExporterError> {
        match credential {
            Credential::Token(token) => Ok(Authenticator::Token(token.clone())),
            Credential::AppInstallation {
                app_id,
                installation_id,
                private_key_path,
            } => {
                let pem = fs::read(private_key_path).map_err(|e| {
                    ExporterError::Authentication(format!(
                        "cannot read app private key {}: {e}",
                        private_key_path.display()
                    ))
                })?;
                let key = EncodingKey::from_rsa_pem(&pem).map_err(|e| {
                    ExporterError::Authentication(format!(
                        "cannot parse app private key {}: {e}",
                        private_key_path.display()
                    ))
                })?;

                Ok(Authenticator::Installation(InstallationAuth {
                    app_id: *app_id,
                    key,
                    token_url: endpoint
                        .join(&format!("app/installations/{installation_id}/access_tokens")),
                    cached: Mutex::new(None),
                }))
            }
        }
    }

    pub async fn bearer(&self, http: &reqwest::Client) -> Result<String, ApiError> {
        match self {
            Authenticator::Token(token) => Ok(token.clone()),
            Authenticator::Installation(auth) => auth.token(http).await,
        }
    }
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct InstallationAuth {
    app_id: u64,
    key: EncodingKey,
    token_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl InstallationAuth {
    /// Signs a JWT identifying the app.
    ///
    /// `iat` is backdated by a minute to absorb clock drift; GitHub
    /// rejects an `exp` more than ten minutes ahead.
    fn app_jwt(&self) -> Result<String, ApiError> {
        let now = util::unix_now();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 9 * 60,
            iss: self.app_id.to_string(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| ApiError::Token(format!("cannot sign app jwt: {e}")))
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        let margin = ChronoDuration::seconds(TOKEN_RENEW_MARGIN_SECS);
        guard
            .as_ref()
            .filter(|c| c.expires_at - margin > Utc::now())
            .map(|c| c.token.clone())
    }

    // The cache lock is never held across the exchange below. Two
    // fetchers racing on an expired token both renew it; the last
    // one wins, both tokens are valid.
    async fn token(&self, http: &reqwest::Client) -> Result<String, ApiError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let jwt = self.app_jwt()?;
        let resp = http.post(&self.token_url).bearer_auth(jwt).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Token(format!(
                "{} answered {status}",
                self.token_url
            )));
        }

        let issued: InstallationToken = resp.json().await?;
        debug!("installation token renewed, expires at {}", issued.expires_at);

        let token = issued.token.clone();
        *self.cached.lock().unwrap_or_else(|p| p.into_inner()) = Some(CachedToken {
            token: issued.token,
            expires_at: issued.expires_at,
        });

        Ok(token)
    }
}
