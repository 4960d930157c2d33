use serde::{Deserialize, Serialize};

/// Request body for admin user creation. `role` is required.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddAdminRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Body of `/create-column` and `/delete-column`.
#[derive(Debug, Deserialize)]
pub struct ColumnRequest {
    #[serde(default, rename = "columnName")]
    pub column_name: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

/// Per-identity result of a bulk delete.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub id: i64,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
