//! Sync protocol message types.
//!
//! Four logical operations travel between client and server: `new` uploads a
//! whole container, `get` downloads it, `push` appends changes and `pull`
//! reads them back. Push and pull bodies are JSON with ids as hex strings;
//! `new` carries the raw container blob and `get` the UTF-8 Lix id.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use lix_core::{Change, LixId};
use lix_store::Cursor;

use crate::convergence::StateHash;
use crate::error::{Result, SyncError};

/// Message shown in place of the real error on internal failures.
pub const REDACTED_MESSAGE: &str = "internal server error";

const INTERNAL_ERROR_BODY: &[u8] =
    br#"{"error":{"code":"internal","message":"internal server error"}}"#;

/// The four protocol operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    New,
    Get,
    Push,
    Pull,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::New => "new",
            Operation::Get => "get",
            Operation::Push => "push",
            Operation::Pull => "pull",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Store a new container under its `lix-id`.
    New { blob: Bytes },
    /// Download a stored container.
    Get { lix_id: LixId },
    /// Append changes to a stored container.
    Push { lix_id: LixId, changes: Vec<Change> },
    /// Read changes after a cursor (all changes when `since` is absent).
    Pull { lix_id: LixId, since: Option<Cursor> },
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::New { .. } => Operation::New,
            Request::Get { .. } => Operation::Get,
            Request::Push { .. } => Operation::Push,
            Request::Pull { .. } => Operation::Pull,
        }
    }

    /// Encode into an operation and wire body.
    pub fn encode(&self) -> Result<(Operation, Bytes)> {
        let body = match self {
            Request::New { blob } => blob.clone(),
            Request::Get { lix_id } => Bytes::from(lix_id.to_string()),
            Request::Push { lix_id, changes } => to_json(&PushBody {
                lix_id: lix_id.clone(),
                changes: changes.clone(),
            })?,
            Request::Pull { lix_id, since } => to_json(&PullBody {
                lix_id: lix_id.clone(),
                since: *since,
            })?,
        };
        Ok((self.operation(), body))
    }

    /// Decode a wire body for the given operation.
    pub fn decode(operation: Operation, body: &[u8]) -> Result<Self> {
        match operation {
            Operation::New => Ok(Request::New {
                blob: Bytes::copy_from_slice(body),
            }),
            Operation::Get => {
                let id = std::str::from_utf8(body)
                    .map_err(|_| SyncError::Decode("lix id is not valid UTF-8".into()))?
                    .trim();
                if id.is_empty() {
                    return Err(SyncError::BadRequest("missing lix id".into()));
                }
                Ok(Request::Get {
                    lix_id: LixId::new(id),
                })
            }
            Operation::Push => {
                let body: PushBody = from_json(body)?;
                Ok(Request::Push {
                    lix_id: body.lix_id,
                    changes: body.changes,
                })
            }
            Operation::Pull => {
                let body: PullBody = from_json(body)?;
                Ok(Request::Pull {
                    lix_id: body.lix_id,
                    since: body.since,
                })
            }
        }
    }
}

/// JSON body of a push request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushBody {
    pub lix_id: LixId,
    pub changes: Vec<Change>,
}

/// JSON body of a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullBody {
    pub lix_id: LixId,
    #[serde(default)]
    pub since: Option<Cursor>,
}

/// Response to `new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResult {
    pub lix_id: LixId,
}

/// Response to `push`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResult {
    /// Server log position after the push.
    pub cursor: Cursor,
    /// Changes that were new to the server.
    pub accepted: usize,
    /// Changes the server already had.
    pub duplicates: usize,
    /// State hash of the server's change set after the push.
    pub state_hash: StateHash,
}

/// Response to `pull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResult {
    /// Changes after the requested cursor, in canonical order.
    pub changes: Vec<Change>,
    /// Marker for the next incremental pull.
    pub cursor: Cursor,
    /// State hash of the server's full change set.
    pub state_hash: StateHash,
}

/// Error codes carried in error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Conflict,
    Internal,
}

/// `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    /// Turn a received error body back into the matching error.
    pub fn into_error(self) -> SyncError {
        let message = self.error.message;
        match self.error.code {
            ErrorCode::BadRequest => SyncError::BadRequest(message),
            ErrorCode::NotFound => SyncError::NotFound(message),
            ErrorCode::Conflict => SyncError::Conflict(message),
            ErrorCode::Internal => SyncError::Internal(message),
        }
    }
}

/// Response status, modeled on the HTTP codes the server answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Created,
    BadRequest,
    NotFound,
    Conflict,
    InternalServerError,
}

impl StatusCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::Conflict => 409,
            StatusCode::InternalServerError => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Ok | StatusCode::Created)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A response: status plus body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Bytes,
}

impl Response {
    /// A response with a raw body.
    pub fn bytes(status: StatusCode, body: Bytes) -> Self {
        Self { status, body }
    }

    /// A response with a JSON body.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self> {
        Ok(Self {
            status,
            body: to_json(value)?,
        })
    }

    /// The response for an error.
    ///
    /// Internal failures get a fixed body; the real error must be logged by
    /// the caller.
    pub fn error(err: &SyncError) -> Self {
        let status = err.status();
        let (code, message) = match status {
            StatusCode::BadRequest => (ErrorCode::BadRequest, err.to_string()),
            StatusCode::NotFound => (ErrorCode::NotFound, err.to_string()),
            StatusCode::Conflict => (ErrorCode::Conflict, err.to_string()),
            _ => return Self::internal_error(),
        };
        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        match serde_json::to_vec(&body) {
            Ok(bytes) => Self::bytes(status, Bytes::from(bytes)),
            Err(_) => Self::internal_error(),
        }
    }

    /// The redacted 500 response.
    pub fn internal_error() -> Self {
        Self::bytes(
            StatusCode::InternalServerError,
            Bytes::from_static(INTERNAL_ERROR_BODY),
        )
    }

    /// Decode a JSON body.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| SyncError::Decode(e.to_string()))
    }

    /// Pass a success response through, or map an error response back into
    /// a [`SyncError`].
    pub fn into_result(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        match serde_json::from_slice::<ErrorBody>(&self.body) {
            Ok(body) => Err(body.into_error()),
            Err(_) => Err(SyncError::Transport(format!(
                "unexpected {} response without error body",
                self.status
            ))),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| SyncError::Internal(format!("json encoding failed: {}", e)))
}

fn from_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| SyncError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lix_core::{ChangeBuilder, EntityId, FileId, SchemaKey};
    use serde_json::json;

    #[test]
    fn test_push_body_uses_hex_ids() {
        let change = ChangeBuilder::new(
            FileId::new("f"),
            EntityId::new("k|a"),
            SchemaKey::new("csv_row_v1").unwrap(),
        )
        .plugin("csv")
        .snapshot(json!({"values": {"k": "a"}}))
        .created_at(1)
        .build();
        let request = Request::Push {
            lix_id: LixId::new("lix-1"),
            changes: vec![change.clone()],
        };

        let (operation, body) = request.encode().unwrap();
        assert_eq!(operation, Operation::Push);

        let raw: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(raw["changes"][0]["id"], json!(change.id.to_hex()));

        assert_eq!(Request::decode(operation, &body).unwrap(), request);
    }

    #[test]
    fn test_pull_since_is_optional() {
        let request = Request::decode(Operation::Pull, br#"{"lix_id":"abc"}"#).unwrap();
        assert_eq!(
            request,
            Request::Pull {
                lix_id: LixId::new("abc"),
                since: None
            }
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Request::decode(Operation::Push, b"not json"),
            Err(SyncError::Decode(_))
        ));
        assert!(matches!(
            Request::decode(Operation::Get, &[0xff, 0xfe]),
            Err(SyncError::Decode(_))
        ));
        assert!(matches!(
            Request::decode(Operation::Get, b"  "),
            Err(SyncError::BadRequest(_))
        ));
    }

    #[test]
    fn test_internal_error_is_redacted() {
        let response = Response::error(&SyncError::Internal("disk on fire at /var/lix".into()));
        assert_eq!(response.status, StatusCode::InternalServerError);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(
            body,
            json!({"error": {"code": "internal", "message": REDACTED_MESSAGE}})
        );
    }

    #[test]
    fn test_error_response_maps_back() {
        let response = Response::error(&SyncError::Conflict("lix abc exists".into()));
        assert_eq!(response.status.as_u16(), 409);
        assert!(matches!(
            response.into_result(),
            Err(SyncError::Conflict(message)) if message.contains("lix abc exists")
        ));
    }
}
