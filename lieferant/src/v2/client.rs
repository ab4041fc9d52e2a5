use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::{mpsc, oneshot};
use futures::{SinkExt, StreamExt};
use reqwest::header::HeaderMap;
use url::Url;

mod driver;
mod redirect;
mod www_authenticate;

use driver::Driver;

use crate::error::Error;
use crate::v2::domain::layer::Layer;
use crate::v2::domain::manifest::Manifest;
use crate::v2::token::{Credentials, RemoteTokenManager, TokenManager};
use crate::v2::transport::{HttpsTransport, Transport};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BLOB_MAX_SIZE: usize = 4096;
const DEFAULT_TAG: &str = "latest";

/// Registry pull client, according to
/// [spec](https://docs.docker.com/registry/spec/api/)
///
/// Each client owns a worker task which processes one request
/// at a time; concurrent calls on the same client are queued.
/// Dropping the client cancels the worker along with any
/// outstanding operations.
pub struct RegistryClient {
    commands: mpsc::Sender<Command>,
    worker: tokio::task::JoinHandle<()>,
}

enum Command {
    GetManifest {
        path: String,
        tag: Option<String>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Manifest, Error>>,
    },
    GetBlob {
        path: String,
        digest: Option<String>,
        file_path: PathBuf,
        timeout: Option<Duration>,
        max_size: Option<usize>,
        reply: oneshot::Sender<Result<usize, Error>>,
    },
}

impl RegistryClient {
    /// Builds a registry pull client.
    ///
    /// The token endpoint is fixed at construction; challenge
    /// realms are informational. Credentials, when given, are
    /// forwarded to the token endpoint with every exchange.
    ///
    /// # Example
    ///
    /// Fetch the alpine manifest from docker registry.
    ///
    /// ```rust,no_run
    /// use lieferant::v2::client::RegistryClient;
    ///
    /// let registry = "https://registry-1.docker.io".parse().unwrap();
    /// let auth = "https://auth.docker.io/token".parse().unwrap();
    ///
    /// async {
    ///     let client = RegistryClient::build(registry, auth, None).unwrap();
    ///
    ///     let manifest = client
    ///         .get_manifest("library/alpine", None, None)
    ///         .await;
    ///
    ///     println!("Got Manifest: {:?}", manifest.unwrap());
    /// };
    /// ```
    #[fehler::throws]
    pub fn build(
        registry_url: Url,
        auth_url: Url,
        credentials: Option<Credentials>,
    ) -> Self {
        let transport = HttpsTransport::build()?;
        let token_manager = RemoteTokenManager::new(auth_url)?;

        Self::with_parts(
            registry_url,
            Arc::new(transport),
            Arc::new(token_manager),
            credentials,
        )
    }

    pub(crate) fn with_parts(
        registry_url: Url,
        transport: Arc<dyn Transport>,
        token_manager: Arc<dyn TokenManager>,
        credentials: Option<Credentials>,
    ) -> Self {
        let (commands, receiver) = mpsc::channel(1);

        let worker = Worker {
            registry_url,
            transport,
            token_manager,
            credentials,
            commands: receiver,
        };

        Self {
            commands,
            worker: tokio::spawn(worker.run()),
        }
    }

    /// Fetches and decodes the manifest of `path`, tagged with
    /// `tag` (`"latest"` when absent).
    ///
    /// Defaults: 10 second timeout, granted anew to every hop
    /// of the exchange.
    #[fehler::throws]
    pub async fn get_manifest(
        &self,
        path: &str,
        tag: Option<&str>,
        timeout: Option<Duration>,
    ) -> Manifest {
        let (reply, result) = oneshot::channel();

        self.dispatch(Command::GetManifest {
            path: path.into(),
            tag: tag.map(Into::into),
            timeout,
            reply,
        })
        .await?;

        result.await.map_err(|_| Error::Terminated)??
    }

    /// Downloads the blob `digest` of `path` into `file_path`,
    /// returning the byte count.
    ///
    /// The parent directory is created if missing. Defaults: 10
    /// second timeout, 4096 byte size limit. The limit suits
    /// small config payloads; override it for real layers.
    #[fehler::throws]
    pub async fn get_blob(
        &self,
        path: &str,
        digest: Option<&str>,
        file_path: impl Into<PathBuf>,
        timeout: Option<Duration>,
        max_size: Option<usize>,
    ) -> usize {
        let (reply, result) = oneshot::channel();

        self.dispatch(Command::GetBlob {
            path: path.into(),
            digest: digest.map(Into::into),
            file_path: file_path.into(),
            timeout,
            max_size,
            reply,
        })
        .await?;

        result.await.map_err(|_| Error::Terminated)??
    }

    #[fehler::throws]
    async fn dispatch(&self, command: Command) {
        self.commands
            .clone()
            .send(command)
            .await
            .map_err(|_| Error::Terminated)?
    }
}

impl Drop for RegistryClient {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct Worker {
    registry_url: Url,
    transport: Arc<dyn Transport>,
    token_manager: Arc<dyn TokenManager>,
    credentials: Option<Credentials>,
    commands: mpsc::Receiver<Command>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(command) = self.commands.next().await {
            match command {
                Command::GetManifest {
                    path,
                    tag,
                    timeout,
                    reply,
                } => {
                    let result =
                        self.get_manifest(path, tag, timeout).await;
                    let _ = reply.send(result);
                }
                Command::GetBlob {
                    path,
                    digest,
                    file_path,
                    timeout,
                    max_size,
                    reply,
                } => {
                    let result = self
                        .get_blob(path, digest, file_path, timeout, max_size)
                        .await;
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn driver(&self) -> Driver<'_> {
        Driver {
            transport: &*self.transport,
            token_manager: &*self.token_manager,
            credentials: self.credentials.as_ref(),
        }
    }

    #[fehler::throws]
    async fn get_manifest(
        &self,
        path: String,
        tag: Option<String>,
        timeout: Option<Duration>,
    ) -> Manifest {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let tag = tag.unwrap_or_else(|| DEFAULT_TAG.into());

        if path.contains(' ') {
            fehler::throw!(Error::InvalidPath(path));
        }

        if tag.contains(' ') {
            fehler::throw!(Error::InvalidTag(tag));
        }

        let url = self
            .registry_url
            .join(&format!("/v2/{}/manifests/{}", path, tag))?;

        let response =
            self.driver().drive(url, HeaderMap::new(), timeout).await?;

        Manifest::decode(&response)?
    }

    #[fehler::throws]
    async fn get_blob(
        &self,
        path: String,
        digest: Option<String>,
        file_path: PathBuf,
        timeout: Option<Duration>,
        max_size: Option<usize>,
    ) -> usize {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let max_size = max_size.unwrap_or(DEFAULT_BLOB_MAX_SIZE);

        if path.contains(' ') {
            fehler::throw!(Error::InvalidPath(path));
        }

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let url = self.registry_url.join(&format!(
            "/v2/{}/blobs/{}",
            path,
            digest.as_deref().unwrap_or("")
        ))?;

        let response =
            self.driver().drive(url, HeaderMap::new(), timeout).await?;

        Layer::save(&response, &file_path, digest.as_deref(), max_size)
            .await?
    }
}
