use reqwest::StatusCode;
use std::{
    backtrace::Backtrace,
    error::Error as StdError,
    fmt::{Debug, Display},
};

use crate::base::entity::EntityId;

pub const MANIFEST_CHANGED_MESSAGE: &str = "It appears the manifest has changed since your last stash. \
     Please restore the root entities in the manifest file as they were stashed with.";

#[derive(Debug)]
pub enum Error {
    Context {
        msg: String,
        source: Box<Error>,
    },
    /// Login was rejected or no usable credentials were supplied.
    Credential {
        msg: String,
    },
    /// Any non-2xx answer from the platform or from object storage.
    Http {
        status: StatusCode,
        url: String,
        body: String,
    },
    /// Stashed root entities no longer line up with the workspace's roots.
    StructuralMismatch {
        stashed: Vec<String>,
        current: Vec<String>,
    },
    /// A restored property points at an entity outside the restored set.
    UnresolvedReference {
        entity_id: EntityId,
        referenced_id: EntityId,
    },
    Aborted {
        msg: String,
    },
    Client {
        msg: String,
        bt: Backtrace,
    },
    Internal {
        source: Box<dyn StdError + Send + Sync>,
        bt: Backtrace,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Context { msg, .. } => write!(f, "{}", msg),
            Error::Credential { msg } => write!(f, "Provided credentials are not valid: {}", msg),
            Error::Http { status, url, body } => {
                write!(f, "HTTP {} from {}", status, url)?;
                if !body.is_empty() {
                    write!(f, "\n{}", body)?;
                }
                Ok(())
            }
            Error::StructuralMismatch { stashed, current } => write!(
                f,
                "{}\nstashed roots: [{}]\ncurrent roots: [{}]",
                MANIFEST_CHANGED_MESSAGE,
                stashed.join(", "),
                current.join(", ")
            ),
            Error::UnresolvedReference {
                entity_id,
                referenced_id,
            } => write!(
                f,
                "Entity {} refers to entity {}, which is not part of the restored entities",
                entity_id, referenced_id
            ),
            Error::Aborted { msg } => write!(f, "Aborted: {}", msg),
            Error::Client { msg, .. } => write!(f, "Invalid Request: {}", msg),
            Error::Internal { source, .. } => write!(f, "{}", source),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Context { source, .. } => Some(source.as_ref()),
            Error::Internal { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client {
            msg: msg.into(),
            bt: Backtrace::capture(),
        }
    }

    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential { msg: msg.into() }
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::Aborted { msg: msg.into() }
    }

    pub fn internal(e: impl StdError + Send + Sync + 'static) -> Self {
        Self::Internal {
            source: Box::new(e),
            bt: Backtrace::capture(),
        }
    }

    pub fn internal_msg(msg: impl Into<String>) -> Self {
        Self::Internal {
            source: Box::new(StringError(msg.into())),
            bt: Backtrace::capture(),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            Error::Client { bt, .. } => Some(bt),
            Error::Internal { bt, .. } => Some(bt),
            Error::Context { source, .. } => source.backtrace(),
            _ => None,
        }
    }

    pub fn without_contexts(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.without_contexts(),
            other => other,
        }
    }

    /// Status code of the underlying HTTP failure, if that is what this is.
    pub fn http_status(&self) -> Option<StatusCode> {
        match self.without_contexts() {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::internal(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::internal(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::internal(e)
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::internal(e)
    }
}

impl From<dialoguer::Error> for Error {
    fn from(e: dialoguer::Error) -> Self {
        Error::internal(e)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::client(e.to_string())
    }
}

#[derive(Debug)]
struct StringError(String);

impl Display for StringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for StringError {}

pub trait ContextExt<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T>;
    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ContextExt<T> for std::result::Result<T, E> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| Error::Context {
            msg: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::Context {
            msg: f().into(),
            source: Box::new(e.into()),
        })
    }
}

impl<T> ContextExt<T> for Option<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.ok_or_else(|| Error::client(context))
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.ok_or_else(|| Error::client(f()))
    }
}

#[macro_export]
macro_rules! client_bail {
    ( $fmt:literal $(, $($arg:tt)*)?) => {
        return Err($crate::utils::error::Error::client(format!($fmt $(, $($arg)*)?)))
    };
}

#[macro_export]
macro_rules! client_error {
    ( $fmt:literal $(, $($arg:tt)*)?) => {
        $crate::utils::error::Error::client(format!($fmt $(, $($arg)*)?))
    };
}

#[macro_export]
macro_rules! internal_bail {
    ( $fmt:literal $(, $($arg:tt)*)?) => {
        return Err($crate::utils::error::Error::internal_msg(format!($fmt $(, $($arg)*)?)))
    };
}

#[macro_export]
macro_rules! internal_error {
    ( $fmt:literal $(, $($arg:tt)*)?) => {
        $crate::utils::error::Error::internal_msg(format!($fmt $(, $($arg)*)?))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::backtrace::BacktraceStatus;
    use std::io;

    #[test]
    fn test_client_error_creation() {
        let err = Error::client("invalid input");
        assert!(matches!(&err, Error::Client { msg, .. } if msg == "invalid input"));
        assert!(matches!(err.without_contexts(), Error::Client { .. }));
    }

    #[test]
    fn test_internal_error_creation() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = Error::internal(io_err);
        assert!(matches!(err, Error::Internal { .. }));
        assert!(!matches!(err.without_contexts(), Error::Client { .. }));
    }

    #[test]
    fn test_context_chaining() {
        let inner = Error::client("base error");
        let with_context: Result<()> = Err(inner);
        let err = with_context
            .context("layer 1")
            .context("layer 2")
            .unwrap_err();

        assert!(matches!(&err, Error::Context { msg, .. } if msg == "layer 2"));
        assert!(matches!(err.without_contexts(), Error::Client { .. }));
        assert_eq!(err.to_string(), "layer 2");
    }

    #[test]
    fn test_http_status_survives_context() {
        let err: Result<()> = Err(Error::Http {
            status: StatusCode::UNAUTHORIZED,
            url: "https://example.test/api/entities/".to_string(),
            body: "expired".to_string(),
        });
        let err = err.context("while listing entities").unwrap_err();
        assert_eq!(err.http_status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(Error::client("x").http_status(), None);
    }

    #[test]
    fn test_http_display_includes_body() {
        let err = Error::Http {
            status: StatusCode::NOT_FOUND,
            url: "https://example.test/api/x/".to_string(),
            body: "{\"detail\":\"Not found.\"}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP 404 Not Found from https://example.test/api/x/\n{\"detail\":\"Not found.\"}"
        );
    }

    #[test]
    fn test_structural_mismatch_names_cause() {
        let err = Error::StructuralMismatch {
            stashed: vec!["Projects".to_string(), "Settings".to_string()],
            current: vec!["Projects".to_string()],
        };
        let text = err.to_string();
        assert!(text.starts_with(MANIFEST_CHANGED_MESSAGE));
        assert!(text.contains("stashed roots: [Projects, Settings]"));
    }

    #[test]
    fn test_backtrace_captured_for_client_error() {
        let err = Error::client("test");
        let status = err.backtrace().unwrap().status();
        assert!(
            status == BacktraceStatus::Captured
                || status == BacktraceStatus::Disabled
                || status == BacktraceStatus::Unsupported
        );
        assert!(Error::aborted("no").backtrace().is_none());
    }

    #[test]
    fn test_option_context_ext() {
        let opt: Option<i32> = None;
        let err = opt.context("value was missing").unwrap_err();
        assert!(matches!(&err, Error::Client { msg, .. } if msg == "value was missing"));
    }

    #[test]
    fn test_error_source_chain() {
        let inner = Error::internal_msg("root cause");
        let wrapped: Result<()> = Err(inner);
        let outer = wrapped.context("outer context").unwrap_err();
        assert!(outer.source().is_some());
    }
}
