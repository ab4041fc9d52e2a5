use serde::Deserialize;

use crate::error::Error;
use crate::v2::transport::Response;

const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// A single filesystem layer reference: the content digest of
/// its blob and the legacy id from the layer's v1 compatibility
/// metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct FileSystemLayerInfo {
    pub blob_sum: String,
    pub layer_id: String,
}

/// A decoded [image manifest](https://docs.docker.com/registry/spec/manifest-v2-1/),
/// schema 1 style. Layers keep the source order of the
/// `fsLayers` array, topmost first.
#[derive(Clone, Debug)]
pub struct Manifest {
    pub name: String,
    pub digest: String,
    pub layers: Vec<FileSystemLayerInfo>,
}

#[derive(Deserialize)]
struct RawManifest {
    name: String,
    #[serde(rename = "fsLayers")]
    fs_layers: Vec<RawLayer>,
    history: Vec<RawHistory>,
}

#[derive(Deserialize)]
struct RawLayer {
    #[serde(rename = "blobSum")]
    blob_sum: String,
}

#[derive(Deserialize)]
struct RawHistory {
    #[serde(rename = "v1Compatibility")]
    v1_compatibility: String,
}

/// `v1Compatibility` is JSON embedded in a JSON string; it is
/// decoded as a separate step, never as part of the outer
/// schema.
#[derive(Deserialize)]
struct RawCompatibility {
    id: String,
}

impl Manifest {
    /// Decodes a manifest response. The digest comes from the
    /// `Docker-Content-Digest` header, everything else from the
    /// body. Nothing partial is ever returned.
    #[fehler::throws]
    pub(crate) fn decode(response: &Response) -> Self {
        let digest =
            response.headers.get(DIGEST_HEADER).ok_or_else(|| {
                Error::MalformedManifest(
                    "Docker-Content-Digest header missing in response"
                        .into(),
                )
            })?;

        let digest = digest.to_str().map_err(|_| {
            Error::MalformedManifest(
                "Docker-Content-Digest header is not valid UTF-8".into(),
            )
        })?;

        if digest.is_empty() {
            fehler::throw!(Error::MalformedManifest(
                "Docker-Content-Digest header is empty".into()
            ));
        }

        let raw: RawManifest = serde_json::from_slice(&response.body)
            .map_err(|err| {
                Error::MalformedManifest(format!(
                    "failed to decode response body: {}",
                    err
                ))
            })?;

        if raw.name.is_empty() {
            fehler::throw!(Error::MalformedManifest(
                "\"name\" is empty".into()
            ));
        }

        if raw.history.len() != raw.fs_layers.len() {
            fehler::throw!(Error::MalformedManifest(format!(
                "\"history\" and \"fsLayers\" count mismatch: {} != {}",
                raw.history.len(),
                raw.fs_layers.len(),
            )));
        }

        let layers = raw
            .fs_layers
            .into_iter()
            .zip(raw.history)
            .enumerate()
            .map(|(index, (layer, history))| {
                let compatibility: RawCompatibility =
                    serde_json::from_str(&history.v1_compatibility)
                        .map_err(|err| {
                            Error::MalformedManifest(format!(
                                "failed to decode v1 compatibility for \
                                 layer {}: {}",
                                index, err
                            ))
                        })?;

                if layer.blob_sum.is_empty() {
                    return Err(Error::MalformedManifest(format!(
                        "\"blobSum\" is empty for layer {}",
                        index
                    )));
                }

                if compatibility.id.is_empty() {
                    return Err(Error::MalformedManifest(format!(
                        "\"id\" is empty for layer {}",
                        index
                    )));
                }

                Ok(FileSystemLayerInfo {
                    blob_sum: layer.blob_sum,
                    layer_id: compatibility.id,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self {
            name: raw.name,
            digest: digest.into(),
            layers,
        }
    }
}
