use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::error::Error;

/// Registry credentials, forwarded verbatim to the token
/// endpoint.
#[derive(Clone, Debug)]
pub enum Credentials {
    Token(String),
    Basic { username: String, password: String },
}

/// A bearer token issued by the authorization service. Only
/// `raw` takes part in the protocol; the rest is bookkeeping
/// for callers.
#[derive(Clone, Debug)]
pub struct Token {
    pub raw: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_in: Option<Duration>,
    pub scope: String,
}

/// Exchanges a `(service, scope)` challenge for a bearer token.
///
/// Implementations may round-trip to a separate authorization
/// endpoint; the request driver applies its own timeout on top
/// of this call.
#[async_trait::async_trait]
pub trait TokenManager: Send + Sync {
    async fn get_token(
        &self,
        service: &str,
        scope: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Token, Error>;
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "token")]
    access_token: String,
    expires_in: Option<u64>,
}

/// Token manager backed by a registry authorization endpoint,
/// according to [spec](https://docs.docker.com/registry/spec/auth/token/)
pub struct RemoteTokenManager {
    client: reqwest::Client,
    auth_url: Url,
}

impl RemoteTokenManager {
    #[fehler::throws]
    pub fn new(auth_url: Url) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(super::transport::USER_AGENT)
            .build()
            .map_err(Error::Transport)?;

        Self { client, auth_url }
    }
}

#[async_trait::async_trait]
impl TokenManager for RemoteTokenManager {
    async fn get_token(
        &self,
        service: &str,
        scope: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Token, Error> {
        let query = [("service", service), ("scope", scope)];

        let request = self.client.get(self.auth_url.clone()).query(&query);

        let request = match credentials {
            Some(Credentials::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(Credentials::Token(token)) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(Error::Transport)?;

        if !response.status().is_success() {
            return Err(Error::Auth(format!(
                "token endpoint replied with {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|err| {
            Error::Auth(format!("malformed token response: {}", err))
        })?;

        Ok(Token {
            raw: token.access_token,
            acquired_at: Utc::now(),
            expires_in: token.expires_in.map(Duration::from_secs),
            scope: scope.into(),
        })
    }
}
