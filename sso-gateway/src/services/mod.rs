//! Services layer: token authority, authorization engine, identity backend
//! client and metrics export.

mod authz;
pub mod error;
pub mod identity;
mod jwt;
pub mod metrics;
mod token_authority;

pub use authz::{Authorizer, Decision, RolePolicy, RoleSet};
pub use identity::{
    HttpIdentityProvider, Identity, IdentityError, IdentityProvider, StaticIdentityProvider,
};
pub use jwt::{AccessTokenClaims, JwtService, TokenError};
pub use metrics::{get_metrics, init_metrics};
pub use token_authority::{IssueError, IssuedCredentials, RotateError, TokenAuthority};
