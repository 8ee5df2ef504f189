use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Status reported for failures that never produced an HTTP response.
pub const NETWORK_ERROR_STATUS: u16 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub message: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ApiError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code,
            error_code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn is_network(&self) -> bool {
        self.status_code == NETWORK_ERROR_STATUS
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status_code)
    }
}

impl std::error::Error for ApiError {}

/// Outcome of an API call. On the wire it carries a `success` flag that always agrees
/// with the variant: `{"success": true, "data": ..}` or `{"success": false, "error": ..}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResult<T> {
    Success { data: T },
    Failure { error: ApiError },
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireRef<'a, T> {
    Success { success: bool, data: &'a T },
    Failure { success: bool, error: &'a ApiError },
}

// Failure is tried first so an `Option` payload cannot swallow an error envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum Wire<T> {
    Failure { success: bool, error: ApiError },
    Success { success: bool, data: T },
}

impl<T: Serialize> Serialize for ApiResult<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success { data } => WireRef::Success {
                success: true,
                data,
            },
            Self::Failure { error } => WireRef::Failure {
                success: false,
                error,
            },
        }
        .serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for ApiResult<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Wire::<T>::deserialize(deserializer)? {
            Wire::Success {
                success: true,
                data,
            } => Ok(Self::Success { data }),
            Wire::Failure {
                success: false,
                error,
            } => Ok(Self::Failure { error }),
            Wire::Success { .. } | Wire::Failure { .. } => Err(serde::de::Error::custom(
                "success flag does not match the envelope",
            )),
        }
    }
}

impl<T> ApiResult<T> {
    pub fn success(data: T) -> Self {
        Self::Success { data }
    }

    pub fn failure(error: ApiError) -> Self {
        Self::Failure { error }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Failure { error } => Err(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A local file to send as the `file` part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFile {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
}

impl UploadFile {
    pub fn new(
        path: impl Into<PathBuf>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }
}
