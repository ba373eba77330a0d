pub mod auth;

pub use auth::{LoginRequest, LogoutQuery, SessionResponse};
