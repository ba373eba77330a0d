//! Registry entities: services, their resources and the roles resources require.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Backend service reachable through the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub service_id: Uuid,
    /// Unique name, matched against the first path segment.
    pub service_name: String,
    /// Absolute base URL requests are forwarded to.
    pub base_address: String,
}

impl Service {
    pub fn new(service_name: impl Into<String>, base_address: impl Into<String>) -> Self {
        Self {
            service_id: Uuid::new_v4(),
            service_name: service_name.into(),
            base_address: base_address.into(),
        }
    }
}

/// Path/method pattern of a service plus the roles needed to call it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Resource {
    pub resource_id: Uuid,
    pub service_id: Uuid,
    pub path_pattern: String,
    pub method_pattern: String,
    pub required_roles: Vec<String>,
}

impl Resource {
    pub fn new(
        service_id: Uuid,
        path_pattern: impl Into<String>,
        method_pattern: impl Into<String>,
        required_roles: &[&str],
    ) -> Self {
        Self {
            resource_id: Uuid::new_v4(),
            service_id,
            path_pattern: path_pattern.into(),
            method_pattern: method_pattern.into(),
            required_roles: required_roles.iter().map(|r| r.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub role_name: String,
}

impl Role {
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
        }
    }
}

/// One complete read of the registry tables.
#[derive(Debug, Clone, Default)]
pub struct RegistryData {
    pub services: Vec<Service>,
    pub resources: Vec<Resource>,
    pub roles: Vec<Role>,
}
