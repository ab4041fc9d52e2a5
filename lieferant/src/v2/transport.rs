use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use url::Url;

use crate::error::Error;

pub(crate) const USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// A fully buffered registry response.
#[derive(Clone, Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// One-shot HTTP GET against the registry or a content backend.
///
/// The timeout covers the whole exchange, body read included;
/// on expiry the in-flight request is dropped and the caller
/// sees [`Error::Timeout`].
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<Response, Error>;
}

pub struct HttpsTransport {
    client: reqwest::Client,
}

impl HttpsTransport {
    #[fehler::throws]
    pub fn build() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(Error::Transport)?;

        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpsTransport {
    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<Response, Error> {
        let exchange = async {
            let response = self
                .client
                .get(url.clone())
                .headers(headers.clone())
                .send()
                .await?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;

            Ok(Response {
                status,
                headers,
                body,
            })
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(Error::Transport)
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use url::Url;

    use super::{HttpsTransport, Transport};
    use crate::error::Error;

    #[tokio::test]
    async fn test_timeout_covers_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind a listener");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = [0u8; 1024];

            // Drain the request, never answer.
            while socket.read(&mut buffer).await.unwrap_or(0) > 0 {}
        });

        let transport =
            HttpsTransport::build().expect("Failed to build transport");
        let url = Url::parse(&format!("http://{}/v2/", addr)).unwrap();

        let error = transport
            .get(&url, &Default::default(), Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Timeout));
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind a listener");
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            HttpsTransport::build().expect("Failed to build transport");
        let url = Url::parse(&format!("http://{}/v2/", addr)).unwrap();

        let error = transport
            .get(&url, &Default::default(), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Transport(_)));
    }
}
