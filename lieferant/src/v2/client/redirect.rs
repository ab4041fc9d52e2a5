use url::Url;

use crate::error::Error;

const SCHEME_PREFIX: &str = "https://";
const DEFAULT_SSL_PORT: u16 = 443;

/// Parses the `Location` header of a temporary redirect.
///
/// Content backends are assumed to speak https, optionally on an
/// explicit port. Userinfo and query strings are not handled.
#[fehler::throws]
pub fn parse(location: &str) -> Url {
    let remainder =
        location.strip_prefix(SCHEME_PREFIX).ok_or_else(|| {
            Error::InvalidRedirect(format!(
                "expected '{}' prefix in '{}'",
                SCHEME_PREFIX, location
            ))
        })?;

    let (authority, path) = match remainder.find('/') {
        Some(index) => remainder.split_at(index),
        None => (remainder, "/"),
    };

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                Error::InvalidRedirect(format!(
                    "failed to parse '{}' for port",
                    location
                ))
            })?;

            (host, port)
        }
        None => (authority, DEFAULT_SSL_PORT),
    };

    if host.is_empty() {
        fehler::throw!(Error::InvalidRedirect(format!(
            "no host in '{}'",
            location
        )));
    }

    Url::parse(&format!("https://{}:{}{}", host, port, path))
        .map_err(|_| Error::InvalidRedirect(location.into()))?
}

#[cfg(test)]
mod tests {
    use super::parse;
    use crate::error::Error;

    #[test]
    fn test_explicit_port() {
        let url = parse("https://cdn.example:8443/blobs/sha256:layer1")
            .expect("Failed to parse location");

        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("cdn.example"));
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.path(), "/blobs/sha256:layer1");
    }

    #[test]
    fn test_default_port() {
        let url = parse("https://cdn.example/blobs/sha256:layer1")
            .expect("Failed to parse location");

        assert_eq!(url.port_or_known_default(), Some(443));
    }

    #[test]
    fn test_missing_path() {
        let url =
            parse("https://cdn.example").expect("Failed to parse location");

        assert_eq!(url.path(), "/");
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let location = "https://cdn.example:8443/blobs/sha256:layer1";

        assert_eq!(parse(location).unwrap(), parse(location).unwrap());
    }

    #[test]
    fn test_rejects_other_schemes() {
        for location in &["http://cdn.example/blob", "ftp://cdn.example"] {
            let error = parse(location).unwrap_err();

            assert!(matches!(error, Error::InvalidRedirect(_)));
        }
    }

    #[test]
    fn test_rejects_unparseable_ports() {
        for location in
            &["https://cdn.example:eight/blob", "https://cdn.example:65536/"]
        {
            let error = parse(location).unwrap_err();

            assert!(matches!(error, Error::InvalidRedirect(_)));
        }
    }
}
