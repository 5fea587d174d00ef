use std::path::PathBuf;

use thiserror::Error;

/// Why a slot produced no content this cycle. Never fatal to the cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for slot {slot} failed: {message}")]
    Transport { slot: String, message: String },
    #[error("slot {slot} answered with non-JSON content type `{content_type}`")]
    UnexpectedContentType { slot: String, content_type: String },
    #[error("slot {slot} body is not valid JSON even after repair: {message}")]
    Parse { slot: String, message: String },
}

impl FetchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "FETCH_TRANSPORT",
            Self::UnexpectedContentType { .. } => "FETCH_CONTENT_TYPE",
            Self::Parse { .. } => "FETCH_PARSE",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::UnexpectedContentType { .. } => "unexpected-content-type",
            Self::Parse { .. } => "parse",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored record for key {key}")]
    NotFound { key: String },
    #[error("stored record {} is not valid JSON: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("key {key} already stores different content")]
    Conflict { key: String },
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_codes_are_distinct() {
        let transport = FetchError::Transport {
            slot: "03".into(),
            message: "connection refused".into(),
        };
        let content_type = FetchError::UnexpectedContentType {
            slot: "03".into(),
            content_type: "text/html".into(),
        };
        let parse = FetchError::Parse {
            slot: "03".into(),
            message: "eof".into(),
        };
        assert_eq!(transport.code(), "FETCH_TRANSPORT");
        assert_eq!(content_type.kind(), "unexpected-content-type");
        assert!(parse.to_string().contains("slot 03"));
    }
}
