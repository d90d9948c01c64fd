//! Remote image downloads for tree sources.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::Read;
use std::time::Duration;

/// Downloaded bytes plus the server-declared content type, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAsset {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug)]
pub enum FetchError {
    /// Downloads are switched off for this run.
    Disabled,
    Status(u16),
    /// `declared` is the Content-Length when the server sent one.
    TooLarge { limit: u64, declared: Option<u64> },
    Transport(String),
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "remote downloads are disabled"),
            Self::Status(code) => write!(f, "remote server answered with status {code}"),
            Self::TooLarge {
                limit,
                declared: Some(declared),
            } => write!(f, "remote asset too large: {declared} bytes exceeds {limit}"),
            Self::TooLarge {
                limit,
                declared: None,
            } => write!(f, "remote asset too large: body exceeds {limit} bytes"),
            Self::Transport(message) => write!(f, "remote fetch failed: {message}"),
        }
    }
}

impl Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Synchronous download seam.
pub trait RemoteFetcher {
    fn fetch(&self, url: &str) -> Result<RemoteAsset, FetchError>;
}

/// Blocking HTTP fetcher with a request timeout and a size cap.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lazynote-import/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, max_bytes })
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<RemoteAsset, FetchError> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        if let Some(declared) = response.content_length() {
            if declared > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                    declared: Some(declared),
                });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let bytes = read_capped(response, self.max_bytes)?;

        Ok(RemoteAsset {
            bytes,
            content_type,
        })
    }
}

/// Reads at most `limit` bytes; a longer body is rejected without buffering
/// past `limit + 1`.
fn read_capped(reader: impl Read, limit: u64) -> Result<Vec<u8>, FetchError> {
    let mut bytes = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| FetchError::Transport(err.to_string()))?;
    if bytes.len() as u64 > limit {
        return Err(FetchError::TooLarge {
            limit,
            declared: None,
        });
    }
    Ok(bytes)
}

/// Refuses every download; remote images stay as external references.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

impl RemoteFetcher for OfflineFetcher {
    fn fetch(&self, _url: &str) -> Result<RemoteAsset, FetchError> {
        Err(FetchError::Disabled)
    }
}

pub fn is_remote_url(target: &str) -> bool {
    let lower = target.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::{is_remote_url, read_capped, FetchError, OfflineFetcher, RemoteFetcher};
    use std::io::{self, Read};

    /// Endless body with no declared length.
    struct Endless {
        served: u64,
    }

    impl Read for Endless {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            buf.fill(b'x');
            self.served += buf.len() as u64;
            Ok(buf.len())
        }
    }

    #[test]
    fn body_without_length_is_cut_at_the_cap() {
        let mut body = Endless { served: 0 };

        let err = read_capped(&mut body, 1024).unwrap_err();

        assert!(matches!(
            err,
            FetchError::TooLarge {
                limit: 1024,
                declared: None
            }
        ));
        assert!(body.served <= 1024 + 8192);
        assert_eq!(
            err.to_string(),
            "remote asset too large: body exceeds 1024 bytes"
        );
    }

    #[test]
    fn body_at_the_cap_is_accepted() {
        assert_eq!(read_capped(&b"abcd"[..], 4).unwrap(), b"abcd");
        assert!(read_capped(&b"abcde"[..], 4).is_err());
    }

    #[test]
    fn offline_fetcher_refuses() {
        let result = OfflineFetcher.fetch("https://example.com/a.png");
        assert!(matches!(result, Err(FetchError::Disabled)));
    }

    #[test]
    fn remote_url_detection() {
        assert!(is_remote_url("HTTPS://example.com/x.png"));
        assert!(is_remote_url(" http://example.com"));
        assert!(!is_remote_url("images/x.png"));
        assert!(!is_remote_url("data:image/png;base64,AAAA"));
    }
}
