//! CRDT update-log decoding seam.
//!
//! # Responsibility
//! - Define the decoder contract the host implements.
//! - Run one decode on a helper thread bounded by a timeout.
//!
//! # Invariants
//! - A decoder panic or timeout surfaces as a [`DecodeError`], never as a
//!   panic on the calling thread.
//! - A timed-out worker is abandoned; its late result is dropped.

use serde::Deserialize;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Named regions of one replayed document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DocumentRegions {
    #[serde(default)]
    pub title: String,
    /// Serialized rich-text fragment.
    #[serde(default, alias = "content")]
    pub content_markup: String,
    #[serde(default)]
    pub style: BTreeMap<String, Value>,
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

#[derive(Debug)]
pub enum DecodeError {
    /// No update log exists for the note.
    MissingLog { probed: Option<PathBuf> },
    Io { path: PathBuf, source: io::Error },
    /// The log could not be replayed.
    Corrupt(String),
    Timeout(Duration),
    Panicked(String),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingLog { probed: Some(path) } => {
                write!(f, "update log not found at {}", path.display())
            }
            Self::MissingLog { probed: None } => write!(f, "update log not found"),
            Self::Io { path, source } => {
                write!(f, "cannot read update log {}: {source}", path.display())
            }
            Self::Corrupt(message) => write!(f, "corrupt update log: {message}"),
            Self::Timeout(limit) => write!(f, "decode timed out after {}ms", limit.as_millis()),
            Self::Panicked(message) => write!(f, "decoder panicked: {message}"),
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Replays an update log against an empty document and reads its regions.
///
/// Implementations must be callable from a helper thread.
pub trait UpdateLogDecoder: Send + Sync {
    fn decode(&self, update_log: &[u8]) -> Result<DocumentRegions, DecodeError>;
}

/// Decoder for logs that were already rendered to a JSON regions object
/// (`{"title", "content", "style", "meta"}`), as produced by export tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSnapshotDecoder;

impl UpdateLogDecoder for JsonSnapshotDecoder {
    fn decode(&self, update_log: &[u8]) -> Result<DocumentRegions, DecodeError> {
        serde_json::from_slice(update_log).map_err(|err| DecodeError::Corrupt(err.to_string()))
    }
}

/// Reads a located update log from disk.
pub fn read_update_log(located: Result<PathBuf, Option<PathBuf>>) -> Result<Vec<u8>, DecodeError> {
    let path = located.map_err(|probed| DecodeError::MissingLog { probed })?;
    read_file(&path)
}

fn read_file(path: &Path) -> Result<Vec<u8>, DecodeError> {
    fs::read(path).map_err(|err| DecodeError::Io {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Decodes on a helper thread and waits at most `timeout` for the result.
pub fn decode_with_timeout(
    decoder: Arc<dyn UpdateLogDecoder>,
    update_log: Vec<u8>,
    timeout: Duration,
) -> Result<DocumentRegions, DecodeError> {
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("lazynote-decode".to_string())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| decoder.decode(&update_log)));
            let _ = tx.send(outcome);
        })
        .map_err(|err| DecodeError::Panicked(format!("cannot spawn decode worker: {err}")))?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => Err(DecodeError::Panicked(panic_message(payload.as_ref()))),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(DecodeError::Timeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(DecodeError::Panicked(
            "decode worker exited without a result".to_string(),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        decode_with_timeout, read_update_log, DecodeError, DocumentRegions, JsonSnapshotDecoder,
        UpdateLogDecoder,
    };
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    struct SlowDecoder;

    impl UpdateLogDecoder for SlowDecoder {
        fn decode(&self, _update_log: &[u8]) -> Result<DocumentRegions, DecodeError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(DocumentRegions::default())
        }
    }

    struct PanickingDecoder;

    impl UpdateLogDecoder for PanickingDecoder {
        fn decode(&self, _update_log: &[u8]) -> Result<DocumentRegions, DecodeError> {
            panic!("bad frame");
        }
    }

    #[test]
    fn json_snapshot_decodes_regions() {
        let decoded = decode_with_timeout(
            Arc::new(JsonSnapshotDecoder),
            br#"{"title":"T","content":"<div>x</div>","meta":{"pinned":true}}"#.to_vec(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(decoded.title, "T");
        assert_eq!(decoded.content_markup, "<div>x</div>");
        assert_eq!(decoded.meta["pinned"], serde_json::Value::Bool(true));
    }

    #[test]
    fn corrupt_snapshot_is_a_decode_error() {
        let result = decode_with_timeout(
            Arc::new(JsonSnapshotDecoder),
            b"\x00\x01garbage".to_vec(),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(DecodeError::Corrupt(_))));
    }

    #[test]
    fn slow_decoder_times_out() {
        let result = decode_with_timeout(Arc::new(SlowDecoder), Vec::new(), Duration::from_millis(20));
        assert!(matches!(result, Err(DecodeError::Timeout(_))));
    }

    #[test]
    fn decoder_panic_is_contained() {
        let result = decode_with_timeout(Arc::new(PanickingDecoder), Vec::new(), Duration::from_secs(5));
        match result {
            Err(DecodeError::Panicked(message)) => assert_eq!(message, "bad frame"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_log_reports_probed_path() {
        let err = read_update_log(Err(Some(PathBuf::from("/docs/n1.dat")))).unwrap_err();
        assert_eq!(err.to_string(), "update log not found at /docs/n1.dat");
    }
}
