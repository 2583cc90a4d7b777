use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header carrying the end user id, set by the trusted session layer in
/// front of the service.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the service API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// User id assigned when no user header is present.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Request information for authentication. Header names are lowercase.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
}

impl AuthRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Trimmed, non-empty user id from the user header.
    pub fn user_id(&self) -> Option<&str> {
        self.header(USER_ID_HEADER)
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Authenticated identity: whose balance and tasks a request acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub method: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, method: &str) -> Self {
        Self {
            user_id: user_id.into(),
            method: method.to_string(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USER, "none")
    }
}
