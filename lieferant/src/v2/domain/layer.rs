use std::path::Path;

use ring::digest::{self, SHA256};
use tokio::io::AsyncWriteExt;

use crate::error::Error;
use crate::v2::transport::Response;

const FILE_MODE: u32 = 0o644;

/// Blob payloads, i.e. filesystem layers saved to disk.
pub struct Layer;

impl Layer {
    /// Persists a blob response body at `file_path` and returns
    /// the byte count.
    ///
    /// The body must fit `max_size` and, when a digest is
    /// supplied, hash to it; both are checked before the file is
    /// touched. A partially written file is removed.
    #[fehler::throws]
    pub(crate) async fn save(
        response: &Response,
        file_path: &Path,
        expected_digest: Option<&str>,
        max_size: usize,
    ) -> usize {
        let body = &response.body;

        if body.len() > max_size {
            fehler::throw!(Error::BlobTooLarge {
                limit: max_size,
                actual: body.len(),
            });
        }

        if let Some(expected) = expected_digest {
            let actual = hex::encode(digest::digest(&SHA256, body));

            if expected.strip_prefix("sha256:").unwrap_or(expected)
                != actual
            {
                fehler::throw!(Error::DigestMismatch {
                    expected: expected.into(),
                    actual: format!("sha256:{}", actual),
                });
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(file_path)
            .await?;

        if let Err(err) = file.write_all(body).await {
            drop(file);
            let _ = tokio::fs::remove_file(file_path).await;

            fehler::throw!(Error::Io(err));
        }

        log::debug!(
            "wrote {} blob bytes to {}",
            body.len(),
            file_path.display()
        );

        body.len()
    }
}
