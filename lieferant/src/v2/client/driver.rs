use std::time::Duration;

use reqwest::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, LOCATION, WWW_AUTHENTICATE,
};
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use super::redirect;
use super::www_authenticate::WwwAuthenticate;
use crate::error::Error;
use crate::v2::token::{Credentials, Token, TokenManager};
use crate::v2::transport::{Response, Transport};

/// The request state machine: anonymous probe, challenge,
/// token, resend, redirect.
pub(crate) struct Driver<'a> {
    pub transport: &'a dyn Transport,
    pub token_manager: &'a dyn TokenManager,
    pub credentials: Option<&'a Credentials>,
}

impl Driver<'_> {
    /// Drives a GET to a terminal response.
    ///
    /// At most one token retry and one redirect hop are taken:
    /// seeing the same status twice aborts with `LoopDetected`,
    /// and any non-terminal status after a redirect aborts with
    /// `NoRetryAllowed`, so a single call never issues more than
    /// three requests. Every hop is granted the full `timeout`
    /// anew; the token exchange is timed separately with the
    /// same duration.
    #[fehler::throws]
    pub async fn drive(
        &self,
        url: Url,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Response {
        let mut url = url;
        let mut headers = headers;
        let mut allow_retry = true;
        let mut last_status = None;

        loop {
            log::debug!("GET {}", url);

            let response =
                self.transport.get(&url, &headers, timeout).await?;

            log::debug!("response status: {}", response.status);

            let status = response.status;

            if status == StatusCode::OK {
                return response;
            }

            if status == StatusCode::BAD_REQUEST {
                fehler::throw!(bad_request(&response));
            }

            if last_status == Some(status) {
                fehler::throw!(Error::LoopDetected(status));
            }

            if !allow_retry {
                fehler::throw!(Error::NoRetryAllowed(status));
            }

            match status {
                StatusCode::UNAUTHORIZED => {
                    let token =
                        self.exchange_token(&response, timeout).await?;

                    let value = HeaderValue::from_str(&format!(
                        "Bearer {}",
                        token.raw
                    ))
                    .map_err(|_| {
                        Error::Auth(
                            "token is not a valid header value".into(),
                        )
                    })?;

                    headers.insert(AUTHORIZATION, value);
                    allow_retry = true;
                }
                StatusCode::TEMPORARY_REDIRECT => {
                    let location =
                        response.headers.get(LOCATION).ok_or_else(|| {
                            Error::InvalidRedirect(
                                "'Location' not found in headers".into(),
                            )
                        })?;

                    let location = location.to_str().map_err(|_| {
                        Error::InvalidRedirect(
                            "'Location' is not valid UTF-8".into(),
                        )
                    })?;

                    url = redirect::parse(location)?;
                    allow_retry = false;
                }
                status => fehler::throw!(Error::UnexpectedStatus(status)),
            }

            last_status = Some(status);
        }
    }

    #[fehler::throws]
    async fn exchange_token(
        &self,
        response: &Response,
        timeout: Duration,
    ) -> Token {
        let challenge =
            response.headers.get(WWW_AUTHENTICATE).ok_or_else(|| {
                Error::InvalidChallenge(
                    "no WWW-Authenticate header in response".into(),
                )
            })?;

        let challenge = challenge.to_str().map_err(|_| {
            Error::InvalidChallenge(
                "WWW-Authenticate header is not valid UTF-8".into(),
            )
        })?;

        let attributes = WwwAuthenticate::parse(challenge)?;

        let service = attributes.get("service").ok_or_else(|| {
            Error::Auth("challenge carries no \"service\" attribute".into())
        })?;

        let scope = attributes.get("scope").ok_or_else(|| {
            Error::Auth("challenge carries no \"scope\" attribute".into())
        })?;

        log::debug!("acquiring token for {} ({})", service, scope);

        let exchange =
            self.token_manager.get_token(service, scope, self.credentials);

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| Error::TokenTimeout)??
    }
}

/// Decodes a 400 body of the shape `{"errors": [{"message": …}]}`
/// into a single error, messages joined with `", "`.
fn bad_request(response: &Response) -> Error {
    let body: Value = match serde_json::from_slice(&response.body) {
        Ok(body) => body,
        Err(err) => {
            return Error::MalformedError(format!(
                "failed to parse response JSON: {}",
                err
            ))
        }
    };

    let errors = match body.get("errors").and_then(Value::as_array) {
        Some(errors) => errors,
        None => {
            return Error::MalformedError(
                "'errors' not found in response".into(),
            )
        }
    };

    let mut messages = vec![];

    for error in errors {
        match error.get("message") {
            Some(Value::String(message)) => messages.push(message.clone()),
            Some(_) => {
                return Error::MalformedError(
                    "error 'message' is not a string".into(),
                )
            }
            None => continue,
        }
    }

    Error::BadRequest(messages.join(", "))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::header::{HeaderMap, ACCEPT};
    use url::Url;

    use super::Driver;
    use crate::error::Error;
    use crate::v2::token::testing::{PendingTokenManager, StaticTokenManager};
    use crate::v2::token::TokenManager;
    use crate::v2::transport::testing::{
        response, response_with_headers, ScriptedTransport,
    };

    const CHALLENGE: &str = "Bearer realm=\"https://auth.example/token\",\
                             service=\"registry.example\",\
                             scope=\"repository:library/alpine:pull\"";

    fn manifest_url() -> Url {
        "https://registry.example/v2/library/alpine/manifests/latest"
            .parse()
            .unwrap()
    }

    async fn drive(
        transport: &ScriptedTransport,
        token_manager: &dyn TokenManager,
        headers: HeaderMap,
    ) -> Result<crate::v2::transport::Response, Error> {
        let driver = Driver {
            transport,
            token_manager,
            credentials: None,
        };

        driver
            .drive(manifest_url(), headers, Duration::from_secs(5))
            .await
    }

    #[tokio::test]
    async fn test_token_dance_resends_with_bearer_header() {
        let transport = ScriptedTransport::new(vec![
            response_with_headers(
                401,
                &[("www-authenticate", CHALLENGE)],
                "",
            ),
            response(200, "terminal"),
        ]);
        let token_manager = StaticTokenManager::new("T");

        let response = drive(&transport, &token_manager, HeaderMap::new())
            .await
            .expect("Failed to drive the request");

        assert_eq!(&response.body[..], b"terminal");

        let requests = transport.requests();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1.get("authorization"), None);
        assert_eq!(
            requests[1].1.get("authorization").unwrap(),
            &"Bearer T"
        );

        assert_eq!(
            token_manager.calls(),
            vec![(
                "registry.example".to_string(),
                "repository:library/alpine:pull".to_string(),
            )]
        );
    }

    #[tokio::test]
    async fn test_second_unauthorized_aborts() {
        let transport = ScriptedTransport::new(vec![
            response_with_headers(
                401,
                &[("www-authenticate", CHALLENGE)],
                "",
            ),
            response_with_headers(
                401,
                &[("www-authenticate", CHALLENGE)],
                "",
            ),
        ]);
        let token_manager = StaticTokenManager::new("T");

        let error = drive(&transport, &token_manager, HeaderMap::new())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::LoopDetected(status) if status == 401));
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(token_manager.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_redirect_preserves_headers_and_disables_retry() {
        let transport = ScriptedTransport::new(vec![
            response_with_headers(
                307,
                &[("location", "https://cdn.example:8443/blobs/sha256:a")],
                "",
            ),
            response_with_headers(
                401,
                &[("www-authenticate", CHALLENGE)],
                "",
            ),
        ]);
        let token_manager = StaticTokenManager::new("T");

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, "application/octet-stream".parse().unwrap());

        let error = drive(&transport, &token_manager, headers)
            .await
            .unwrap_err();

        assert!(
            matches!(error, Error::NoRetryAllowed(status) if status == 401)
        );

        let requests = transport.requests();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].0.host_str(), Some("cdn.example"));
        assert_eq!(requests[1].0.port(), Some(8443));
        assert_eq!(
            requests[1].1.get("accept").unwrap(),
            &"application/octet-stream"
        );
        assert!(token_manager.calls().is_empty());
    }

    #[tokio::test]
    async fn test_at_most_three_requests_per_call() {
        let transport = ScriptedTransport::new(vec![
            response_with_headers(
                401,
                &[("www-authenticate", CHALLENGE)],
                "",
            ),
            response_with_headers(
                307,
                &[("location", "https://cdn.example/blobs/sha256:a")],
                "",
            ),
            response(502, ""),
        ]);
        let token_manager = StaticTokenManager::new("T");

        let error = drive(&transport, &token_manager, HeaderMap::new())
            .await
            .unwrap_err();

        assert!(
            matches!(error, Error::NoRetryAllowed(status) if status == 502)
        );
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_redirect_without_location_is_fatal() {
        let transport = ScriptedTransport::new(vec![response(307, "")]);
        let token_manager = StaticTokenManager::new("T");

        let error = drive(&transport, &token_manager, HeaderMap::new())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::InvalidRedirect(_)));
    }

    #[tokio::test]
    async fn test_other_redirects_are_unexpected() {
        let transport = ScriptedTransport::new(vec![response_with_headers(
            302,
            &[("location", "https://cdn.example/blobs/sha256:a")],
            "",
        )]);
        let token_manager = StaticTokenManager::new("T");

        let error = drive(&transport, &token_manager, HeaderMap::new())
            .await
            .unwrap_err();

        assert!(
            matches!(error, Error::UnexpectedStatus(status) if status == 302)
        );
    }

    #[tokio::test]
    async fn test_challenge_without_scope_is_fatal() {
        let transport = ScriptedTransport::new(vec![response_with_headers(
            401,
            &[("www-authenticate", "Bearer service=\"registry.example\"")],
            "",
        )]);
        let token_manager = StaticTokenManager::new("T");

        let error = drive(&transport, &token_manager, HeaderMap::new())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Auth(_)));
        assert!(token_manager.calls().is_empty());
    }

    #[tokio::test]
    async fn test_structured_bad_request_is_never_retried() {
        let body = r#"{"errors":[{"message":"manifest unknown"},
                                  {"message":"repo not found"}]}"#;
        let transport =
            ScriptedTransport::new(vec![response(400, body)]);
        let token_manager = StaticTokenManager::new("T");

        let error = drive(&transport, &token_manager, HeaderMap::new())
            .await
            .unwrap_err();

        match error {
            Error::BadRequest(messages) => {
                assert_eq!(messages, "manifest unknown, repo not found")
            }
            other => panic!("expected BadRequest, got {:?}", other),
        }

        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_bad_request_body() {
        let transport =
            ScriptedTransport::new(vec![response(400, "not json")]);
        let token_manager = StaticTokenManager::new("T");

        let error = drive(&transport, &token_manager, HeaderMap::new())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::MalformedError(_)));
    }

    #[tokio::test]
    async fn test_bad_request_without_errors_array() {
        let transport =
            ScriptedTransport::new(vec![response(400, r#"{"detail": 1}"#)]);
        let token_manager = StaticTokenManager::new("T");

        let error = drive(&transport, &token_manager, HeaderMap::new())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::MalformedError(_)));
    }

    #[tokio::test]
    async fn test_entries_without_message_are_skipped() {
        let body = r#"{"errors":[{"code":"UNKNOWN"},{"message":"nope"}]}"#;
        let transport = ScriptedTransport::new(vec![response(400, body)]);
        let token_manager = StaticTokenManager::new("T");

        let error = drive(&transport, &token_manager, HeaderMap::new())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::BadRequest(messages) if messages == "nope"));
    }

    #[tokio::test]
    async fn test_slow_token_manager_times_out() {
        let transport = ScriptedTransport::new(vec![response_with_headers(
            401,
            &[("www-authenticate", CHALLENGE)],
            "",
        )]);

        let driver = Driver {
            transport: &transport,
            token_manager: &PendingTokenManager,
            credentials: None,
        };

        let error = driver
            .drive(
                manifest_url(),
                HeaderMap::new(),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, Error::TokenTimeout));
    }
}
