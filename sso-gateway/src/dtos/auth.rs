use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::IssuedCredentials;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 256, message = "Login is required"))]
    pub login: String,

    #[validate(length(min = 1, max = 1024, message = "Password is required"))]
    pub password: String,
}

/// Body returned when a session is opened or renewed. The credentials
/// themselves travel only in cookies.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub subject_id: String,
    pub roles: Vec<String>,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

impl From<&IssuedCredentials> for SessionResponse {
    fn from(credentials: &IssuedCredentials) -> Self {
        Self {
            subject_id: credentials.claims.sub.clone(),
            roles: credentials.claims.roles.clone(),
            expires_in: credentials.claims.exp - credentials.claims.iat,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    /// End every session of the subject, not just this one.
    #[serde(default)]
    pub all: bool,
}
