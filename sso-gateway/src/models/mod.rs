pub mod refresh_token;
pub mod registry;

pub use refresh_token::{RefreshTokenRecord, SuccessorToken};
pub use registry::{RegistryData, Resource, Role, Service};
