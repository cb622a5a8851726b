use rocket::{
    http::Status,
    response::{status::Custom, Responder},
    serde::json::Json,
};
use serde::{Deserialize, Serialize};
use split_tally_protocol::{
    BallotError, ConfigError, MismatchError, SubmissionError, TransitionError,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid ballot: {0}")]
    InvalidBallot(#[from] BallotError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(#[from] MismatchError),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Collector halted: {0}")]
    Halted(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Already counted: {0}")]
    Duplicate(String),
}

/// Which kind of error a reply carries. Several kinds share a status, so
/// clients go by this rather than the status alone.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    InvalidBallot,
    InvalidShare,
    UnknownVoter,
    DuplicateVoter,
    Transition,
    ProtocolMismatch,
    Network,
    Halted,
    Unauthorized,
    BadRequest,
    NotFound,
    Conflict,
}

/// Body of every error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Transient failures worth another attempt. Everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Config(_) => Status::InternalServerError,
            Self::InvalidBallot(_) | Self::BadRequest(_) => Status::BadRequest,
            Self::Submission(SubmissionError::Share(_)) => Status::UnprocessableEntity,
            Self::Submission(SubmissionError::UnknownVoter(_)) => Status::Forbidden,
            Self::Submission(SubmissionError::DuplicateVoter(_)) | Self::Duplicate(_) => {
                Status::Conflict
            }
            Self::Transition(_) | Self::Conflict(_) => Status::Conflict,
            Self::ProtocolMismatch(_) => Status::PreconditionFailed,
            Self::Network(_) | Self::Halted(_) => Status::ServiceUnavailable,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::NotFound(_) => Status::NotFound,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::InvalidBallot(_) => ErrorKind::InvalidBallot,
            Self::Submission(SubmissionError::Share(_)) => ErrorKind::InvalidShare,
            Self::Submission(SubmissionError::UnknownVoter(_)) => ErrorKind::UnknownVoter,
            Self::Submission(SubmissionError::DuplicateVoter(_)) | Self::Duplicate(_) => {
                ErrorKind::DuplicateVoter
            }
            Self::Transition(_) => ErrorKind::Transition,
            Self::ProtocolMismatch(_) => ErrorKind::ProtocolMismatch,
            Self::Network(_) => ErrorKind::Network,
            Self::Halted(_) => ErrorKind::Halted,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
        }
    }

    /// Interpret an unsuccessful reply from another collector. `reply` is
    /// the error body, if the server sent one.
    pub fn from_reply(status: u16, reply: Option<ErrorReply>, what: &str) -> Self {
        let kind = reply.as_ref().map(|reply| reply.kind);
        let detail = match reply {
            Some(reply) => format!("{what}: {}", reply.message),
            None => what.to_string(),
        };
        match (status, kind) {
            (409, Some(ErrorKind::DuplicateVoter)) => Self::Duplicate(detail),
            (401, _) => Self::Unauthorized(format!("{what} was not accepted")),
            (404, _) => Self::NotFound(detail),
            (409, _) => Self::Conflict(detail),
            (412, _) => Self::ProtocolMismatch(MismatchError::PeerHalted(format!(
                "{what} refused"
            ))),
            (408 | 429 | 500..=599, _) => {
                Self::Network(format!("{what} failed with status {status}"))
            }
            _ => Self::BadRequest(format!("{what} refused with status {status}")),
        }
    }

    /// Read the error out of an unsuccessful response.
    pub async fn from_response(response: reqwest::Response, what: &str) -> Self {
        let status = response.status().as_u16();
        let reply = response.json::<ErrorReply>().await.ok();
        Self::from_reply(status, reply, what)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!("{self}");
        } else {
            warn!("{self}");
        }
        let reply = ErrorReply {
            kind: self.kind(),
            message: self.to_string(),
        };
        Custom(status, Json(reply)).respond_to(req)
    }
}
