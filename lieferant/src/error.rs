use reqwest::StatusCode;

/// Failures surfaced by registry operations.
///
/// The request driver never recovers from these internally; the
/// only retry it performs is the 401 token dance, which is the
/// normal path rather than error recovery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid repository path: {0}")]
    InvalidPath(String),

    #[error("invalid repository tag: {0}")]
    InvalidTag(String),

    #[error("invalid registry url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("response timeout")]
    Timeout,

    #[error("token response timeout")]
    TokenTimeout,

    #[error("transport failure: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("invalid WWW-Authenticate header: {0}")]
    InvalidChallenge(String),

    #[error("authorization failure: {0}")]
    Auth(String),

    #[error("invalid redirect: {0}")]
    InvalidRedirect(String),

    #[error("bad request, errors: [{0}]")]
    BadRequest(String),

    #[error("malformed bad request response: {0}")]
    MalformedError(String),

    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("unexpected response status: {0}")]
    UnexpectedStatus(StatusCode),

    #[error("response loop detected on status: {0}")]
    LoopDetected(StatusCode),

    #[error("retry not allowed for status: {0}")]
    NoRetryAllowed(StatusCode),

    #[error("blob i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("content digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("blob exceeds size limit: {actual} > {limit} bytes")]
    BlobTooLarge { limit: usize, actual: usize },

    #[error("registry client terminated")]
    Terminated,
}
