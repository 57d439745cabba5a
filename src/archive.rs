//! HAR capture loading.
//!
//! Only the request URL and the response body text of each entry are read;
//! every other HAR field is ignored. Entries that lack either field are
//! reported as [`SkippedEntry`] values instead of failing the whole load.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde_json::Value;

const URL_POINTER: &str = "/request/url";
const TEXT_POINTER: &str = "/response/content/text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedExchange {
    pub request_url: String,
    pub response_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Position of the entry in `log.entries`.
    pub index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnObject,
    MissingUrl,
    MissingResponseText,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAnObject => "entry is not an object",
            Self::MissingUrl => "missing string `request.url`",
            Self::MissingResponseText => "missing string `response.content.text`",
        }
    }
}

impl std::fmt::Display for SkippedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entries[{}]: {}", self.index, self.reason.as_str())
    }
}

/// Exchanges in archive order plus the entries that could not be used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedArchive {
    pub exchanges: Vec<RecordedExchange>,
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Debug)]
pub enum LoadError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Shape {
        path: PathBuf,
        reason: &'static str,
    },
}

impl LoadError {
    pub fn path(&self) -> &Path {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } | Self::Shape { path, .. } => path,
        }
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "read archive {}: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "parse archive {} as JSON: {source}", path.display())
            }
            Self::Shape { path, reason } => {
                write!(f, "archive {} is not a HAR log: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Shape { .. } => None,
        }
    }
}

pub fn load(path: impl AsRef<Path>) -> Result<LoadedArchive, LoadError> {
    let path = path.as_ref();
    let document = fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&document, path)
}

/// Parses an in-memory HAR document. `source` is only used in errors.
pub fn parse(document: &str, source: &Path) -> Result<LoadedArchive, LoadError> {
    let root: Value = serde_json::from_str(document).map_err(|err| LoadError::Parse {
        path: source.to_path_buf(),
        source: err,
    })?;
    let shape_error = |reason| LoadError::Shape {
        path: source.to_path_buf(),
        reason,
    };

    let log = root
        .get("log")
        .ok_or_else(|| shape_error("missing top-level `log` object"))?;
    let entries = log
        .get("entries")
        .ok_or_else(|| shape_error("missing `log.entries`"))?
        .as_array()
        .ok_or_else(|| shape_error("`log.entries` is not an array"))?;

    let mut loaded = LoadedArchive {
        exchanges: Vec::with_capacity(entries.len()),
        skipped: Vec::new(),
    };
    for (index, entry) in entries.iter().enumerate() {
        match exchange_from_entry(entry) {
            Ok(exchange) => loaded.exchanges.push(exchange),
            Err(reason) => loaded.skipped.push(SkippedEntry { index, reason }),
        }
    }

    Ok(loaded)
}

fn exchange_from_entry(entry: &Value) -> Result<RecordedExchange, SkipReason> {
    if !entry.is_object() {
        return Err(SkipReason::NotAnObject);
    }
    let request_url = entry
        .pointer(URL_POINTER)
        .and_then(Value::as_str)
        .ok_or(SkipReason::MissingUrl)?;
    let response_body = entry
        .pointer(TEXT_POINTER)
        .and_then(Value::as_str)
        .ok_or(SkipReason::MissingResponseText)?;

    Ok(RecordedExchange {
        request_url: request_url.to_owned(),
        response_body: response_body.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use super::{LoadError, RecordedExchange, SkipReason, SkippedEntry, load, parse};

    fn entry(url: &str, text: &str) -> serde_json::Value {
        json!({
            "request": { "method": "GET", "url": url, "headers": [] },
            "response": {
                "status": 200,
                "content": { "size": text.len(), "mimeType": "application/json", "text": text }
            }
        })
    }

    fn har(entries: Vec<serde_json::Value>) -> String {
        json!({ "log": { "version": "1.2", "entries": entries } }).to_string()
    }

    #[test]
    fn entries_are_loaded_in_archive_order() {
        let document = har(vec![
            entry("https://api.example.com/v1/a", "first"),
            entry("https://api.example.com/v1/b", "second"),
            entry("https://api.example.com/v1/a", "third"),
        ]);

        let loaded = parse(&document, Path::new("order.har")).expect("archive should parse");
        let bodies: Vec<_> = loaded
            .exchanges
            .iter()
            .map(|exchange| exchange.response_body.as_str())
            .collect();
        assert_eq!(bodies, ["first", "second", "third"]);
        assert!(loaded.skipped.is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped_with_their_index() {
        let document = har(vec![
            entry("https://api.example.com/v1/ok", "ok"),
            json!({ "request": {}, "response": { "content": { "text": "orphan" } } }),
            json!({ "request": { "url": "https://api.example.com/v1/empty" },
                    "response": { "content": { "size": 0 } } }),
            json!("not an entry"),
            json!({ "request": { "url": 42 }, "response": { "content": { "text": "x" } } }),
            entry("https://api.example.com/v1/after", "after"),
        ]);

        let loaded = parse(&document, Path::new("mixed.har")).expect("archive should parse");
        assert_eq!(
            loaded.exchanges,
            vec![
                RecordedExchange {
                    request_url: "https://api.example.com/v1/ok".to_owned(),
                    response_body: "ok".to_owned(),
                },
                RecordedExchange {
                    request_url: "https://api.example.com/v1/after".to_owned(),
                    response_body: "after".to_owned(),
                },
            ]
        );
        assert_eq!(
            loaded.skipped,
            vec![
                SkippedEntry {
                    index: 1,
                    reason: SkipReason::MissingUrl
                },
                SkippedEntry {
                    index: 2,
                    reason: SkipReason::MissingResponseText
                },
                SkippedEntry {
                    index: 3,
                    reason: SkipReason::NotAnObject
                },
                SkippedEntry {
                    index: 4,
                    reason: SkipReason::MissingUrl
                },
            ]
        );
        assert_eq!(
            loaded.skipped[1].to_string(),
            "entries[2]: missing string `response.content.text`"
        );
    }

    #[test]
    fn empty_entries_list_is_a_valid_archive() {
        let loaded = parse(&har(Vec::new()), Path::new("empty.har")).unwrap();
        assert!(loaded.exchanges.is_empty());
        assert!(loaded.skipped.is_empty());
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let err = parse("{\"log\": ", Path::new("broken.har")).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }), "unexpected error: {err:?}");
        assert!(err.to_string().contains("broken.har"), "{err}");
    }

    #[test]
    fn wrong_top_level_shape_is_rejected() {
        let cases = [
            ("{}", "missing top-level `log` object"),
            ("{\"log\": {}}", "missing `log.entries`"),
            ("{\"log\": {\"entries\": {}}}", "`log.entries` is not an array"),
        ];
        for (document, expected) in cases {
            match parse(document, Path::new("shape.har")) {
                Err(LoadError::Shape { reason, .. }) => assert_eq!(reason, expected),
                other => panic!("expected shape error for {document}, got {other:?}"),
            }
        }
    }

    #[test]
    fn missing_file_is_a_read_error_naming_the_path() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let missing = dir.path().join("missing.har");

        let err = load(&missing).unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }), "unexpected error: {err:?}");
        assert_eq!(err.path(), missing.as_path());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn load_reads_archive_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("capture.har");
        std::fs::write(&path, har(vec![entry("https://api.example.com/v1/ping", "pong")]))
            .expect("archive should be written");

        let loaded = load(&path).expect("archive should load");
        assert_eq!(loaded.exchanges.len(), 1);
        assert_eq!(loaded.exchanges[0].response_body, "pong");
    }
}
