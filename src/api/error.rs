use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::io::Cursor;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// PVS unreachable: refused, timed out, DNS failure, broken body stream.
    #[error("unable to reach PVS: {0}")]
    Connectivity(String),

    /// The login exchange itself was rejected, or the session could not be restored.
    #[error("authentication with PVS failed: {0}")]
    Authentication(String),

    #[error("unexpected HTTP status {status} for {path}")]
    Protocol { status: u16, path: String },

    /// Varserver answered, but no variable matched the filter.
    #[error("no variables match {0}")]
    NoMatch(String),

    #[error("varserver does not know {path}: {message}")]
    UnknownPath { path: String, message: String },

    #[error("varserver error for {path}: {message}")]
    Varserver { path: String, message: String },

    #[error("unable to decode varserver response: {message}")]
    Decoding { message: String, body: String },

    #[error("unable to map {entity} field `{field}`: {message}")]
    Mapping {
        entity: &'static str,
        field: String,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("unable to render metrics")]
    FormatError,
}

impl Error {
    /// The fixed set of failures a probe reads as "feature not installed".
    pub fn is_feature_absent(&self) -> bool {
        matches!(
            self,
            Error::Protocol { status: 404, .. } | Error::NoMatch(_) | Error::UnknownPath { .. }
        )
    }

    /// Failures meaning the transport could not talk to the PVS at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connectivity(_) | Error::Authentication(_))
    }
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, error) = match self {
            Error::Authentication(s) => (
                Status::Forbidden,
                format!("<html><body><h3>403 Forbidden</h3>Error while authenticating to PVS: <code>{}</code></body></html>", s),
            ),
            Error::Connectivity(s) => (
                Status::BadGateway,
                format!("<html><body><h3>502 Bad Gateway</h3>PVS unreachable: <code>{}</code></body></html>", s),
            ),
            _ => (
                Status::InternalServerError,
                format!(
                    "<html><body><h3>Unknown exception</h3><code>{}</code></body></html>",
                    self
                ),
            ),
        };

        Response::build()
            .status(status)
            .sized_body(error.len(), Cursor::new(error))
            .header(ContentType::new("text", "html"))
            .ok()
    }
}
