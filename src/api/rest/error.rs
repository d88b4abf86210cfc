use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{Map, Value};

use crate::browser::BrowserError;
use crate::sandbox::{DiffError, FileOpError, LifecycleError, PlatformError};

#[derive(Debug)]
pub enum ApiError {
    MissingParameter(&'static str),
    InvalidParameter(String),
    Unauthorized,
    SandboxNotFound(String),
    DeleteRefused(String),
    /// The sandbox ran the step and it failed; carries its error text.
    CommandFailed {
        code: &'static str,
        message: String,
    },
    Timeout(String),
    Browser(BrowserError),
    Unavailable(String),
    /// Extra fields merged into the error body so callers always see the
    /// operation's usual shape (`content: ""`, `entries: []`, ...).
    WithDefaults(Box<ApiError>, Map<String, Value>),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn with_defaults(self, defaults: Value) -> Self {
        match defaults {
            Value::Object(map) => ApiError::WithDefaults(Box::new(self), map),
            _ => self,
        }
    }

    fn command(code: &'static str, message: impl ToString) -> Self {
        ApiError::CommandFailed {
            code,
            message: message.to_string(),
        }
    }

    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::MissingParameter(name) => (
                StatusCode::BAD_REQUEST,
                "MISSING_PARAMETER",
                format!("Missing {name}"),
            ),
            ApiError::InvalidParameter(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_PARAMETER", msg.clone())
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Unauthorized".to_string(),
            ),
            ApiError::SandboxNotFound(id) => (
                StatusCode::NOT_FOUND,
                "SANDBOX_NOT_FOUND",
                format!("Sandbox {id} not found"),
            ),
            ApiError::DeleteRefused(msg) => (StatusCode::FORBIDDEN, "DELETE_REFUSED", msg.clone()),
            ApiError::CommandFailed { code, message } => {
                (StatusCode::UNPROCESSABLE_ENTITY, *code, message.clone())
            }
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "COMMAND_TIMEOUT", msg.clone()),
            ApiError::Browser(e) => {
                let status = match e {
                    BrowserError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
                    BrowserError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                    BrowserError::ImageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    BrowserError::EmptyExtraction => StatusCode::UNPROCESSABLE_ENTITY,
                    BrowserError::ConnectUrlMissing
                    | BrowserError::Http { .. }
                    | BrowserError::Execution(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.code(), e.to_string())
            }
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PLATFORM_UNAVAILABLE",
                msg.clone(),
            ),
            ApiError::WithDefaults(inner, _) => inner.parts(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = self.parts();
        let mut body = match self {
            ApiError::WithDefaults(_, defaults) => defaults,
            _ => Map::new(),
        };
        body.insert("ok".to_string(), Value::Bool(false));
        body.insert("error".to_string(), Value::String(message));
        body.insert("code".to_string(), Value::String(code.to_string()));
        (status, Json(Value::Object(body))).into_response()
    }
}

impl From<PlatformError> for ApiError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::NotFound(id) | PlatformError::InvalidId(id) => {
                ApiError::SandboxNotFound(id)
            }
            PlatformError::Timeout(_) => ApiError::Timeout(e.to_string()),
            PlatformError::Unavailable(_) | PlatformError::Io(_) | PlatformError::Docker(_) => {
                ApiError::Unavailable(e.to_string())
            }
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::MissingRepo => ApiError::MissingParameter("repo"),
            LifecycleError::InvalidRepo(_) | LifecycleError::InvalidBranch(_) => {
                ApiError::InvalidParameter(e.to_string())
            }
            LifecycleError::CloneFailed(_) => ApiError::command("CLONE_FAILED", e),
            LifecycleError::TokenIssue(_) => ApiError::command("TOKEN_ISSUE_FAILED", e),
            LifecycleError::Unauthorized => ApiError::Unauthorized,
            LifecycleError::Platform(p) => p.into(),
        }
    }
}

impl From<FileOpError> for ApiError {
    fn from(e: FileOpError) -> Self {
        match e {
            FileOpError::Platform(p) => p.into(),
            FileOpError::ProtectedPath(_) => ApiError::DeleteRefused(e.to_string()),
            FileOpError::ReadFailed(_) => ApiError::command("READ_FAILED", e),
            FileOpError::CreateParentFailed(_) => ApiError::command("CREATE_PARENT_FAILED", e),
            FileOpError::WriteFailed(_) => ApiError::command("WRITE_FAILED", e),
            FileOpError::VerifyFailed(_) | FileOpError::SizeMismatch { .. } => {
                ApiError::command("VERIFICATION_FAILURE", e)
            }
            FileOpError::ListFailed(_) => ApiError::command("LIST_FAILED", e),
            FileOpError::ListParse(_) => ApiError::command("LIST_PARSE_FAILURE", e),
            FileOpError::DeleteFailed(_) => ApiError::command("DELETE_FAILED", e),
            FileOpError::RenameFailed(_) => ApiError::command("RENAME_FAILED", e),
        }
    }
}

impl From<DiffError> for ApiError {
    fn from(e: DiffError) -> Self {
        match e {
            DiffError::Status(_) => ApiError::command("GIT_STATUS_FAILED", e),
            DiffError::Stage(_) => ApiError::command("GIT_STAGE_FAILED", e),
            DiffError::Diff(_) => ApiError::command("GIT_DIFF_FAILED", e),
            DiffError::Platform(p) => p.into(),
        }
    }
}

impl From<BrowserError> for ApiError {
    fn from(e: BrowserError) -> Self {
        ApiError::Browser(e)
    }
}
