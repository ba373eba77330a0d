//! Immutable, versioned registry generation.

use chrono::{DateTime, Utc};
use http::Method;
use reqwest::Url;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::pattern::{is_unsafe_segment, split_path, MethodPattern, PathPattern};
use super::{LookupError, RefreshError};
use crate::models::{RegistryData, Service};
use crate::services::RoleSet;

/// Outcome of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    pub service: Arc<Service>,
    pub resource_id: Uuid,
    pub required_roles: Arc<RoleSet>,
    /// Snapshot the answer came from.
    pub version: u64,
}

#[derive(Debug)]
struct Route {
    resource_id: Uuid,
    path: PathPattern,
    method: MethodPattern,
    required_roles: Arc<RoleSet>,
}

#[derive(Debug)]
struct ServiceRoutes {
    service: Arc<Service>,
    routes: Vec<Route>,
}

#[derive(Debug)]
pub struct RegistrySnapshot {
    version: u64,
    fetched_at: DateTime<Utc>,
    services: HashMap<String, ServiceRoutes>,
}

impl RegistrySnapshot {
    /// Build a snapshot from one fetch. Any dangling reference or bad
    /// pattern rejects the whole fetch.
    pub fn build(
        data: RegistryData,
        version: u64,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, RefreshError> {
        let known_roles: HashSet<&str> = data.roles.iter().map(|r| r.role_name.as_str()).collect();

        let mut by_id: HashMap<Uuid, String> = HashMap::with_capacity(data.services.len());
        let mut services: HashMap<String, ServiceRoutes> =
            HashMap::with_capacity(data.services.len());

        for mut service in data.services {
            validate_base_address(&service)?;
            service.base_address = service.base_address.trim_end_matches('/').to_string();

            if services.contains_key(&service.service_name) {
                return Err(RefreshError::Inconsistent(format!(
                    "duplicate service name '{}'",
                    service.service_name
                )));
            }
            if is_unsafe_segment(&service.service_name) || service.service_name.contains('/') {
                return Err(RefreshError::Inconsistent(format!(
                    "service name '{}' is not a valid path segment",
                    service.service_name
                )));
            }

            by_id.insert(service.service_id, service.service_name.clone());
            services.insert(
                service.service_name.clone(),
                ServiceRoutes {
                    service: Arc::new(service),
                    routes: Vec::new(),
                },
            );
        }

        for resource in data.resources {
            let Some(service_name) = by_id.get(&resource.service_id) else {
                return Err(RefreshError::Inconsistent(format!(
                    "resource {} references unknown service {}",
                    resource.resource_id, resource.service_id
                )));
            };

            if let Some(missing) = resource
                .required_roles
                .iter()
                .find(|role| !known_roles.contains(role.as_str()))
            {
                return Err(RefreshError::Inconsistent(format!(
                    "resource {} requires unknown role '{}'",
                    resource.resource_id, missing
                )));
            }

            let path = PathPattern::parse(&resource.path_pattern).map_err(|e| {
                RefreshError::Inconsistent(format!("resource {}: {}", resource.resource_id, e))
            })?;
            let method = MethodPattern::parse(&resource.method_pattern).map_err(|e| {
                RefreshError::Inconsistent(format!("resource {}: {}", resource.resource_id, e))
            })?;

            let required_roles: BTreeSet<String> = resource.required_roles.into_iter().collect();

            if let Some(entry) = services.get_mut(service_name) {
                entry.routes.push(Route {
                    resource_id: resource.resource_id,
                    path,
                    method,
                    required_roles: Arc::new(required_roles),
                });
            }
        }

        for entry in services.values_mut() {
            entry.routes.sort_by(|a, b| {
                a.path
                    .cmp_specificity(&b.path)
                    .then_with(|| a.method.cmp_specificity(&b.method))
                    .then_with(|| a.resource_id.cmp(&b.resource_id))
            });
        }

        Ok(Self {
            version,
            fetched_at,
            services,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn resource_count(&self) -> usize {
        self.services.values().map(|s| s.routes.len()).sum()
    }

    pub fn lookup(
        &self,
        service_name: &str,
        resource_path: &str,
        method: &Method,
    ) -> Result<ResolvedResource, LookupError> {
        let Some(entry) = self.services.get(service_name) else {
            return Err(LookupError::ServiceNotFound(service_name.to_string()));
        };

        let segments: Vec<&str> = split_path(resource_path).collect();
        let not_found = || LookupError::ResourceNotFound {
            service: service_name.to_string(),
            path: resource_path.to_string(),
        };

        if segments.iter().any(|s| is_unsafe_segment(s)) {
            return Err(not_found());
        }

        entry
            .routes
            .iter()
            .find(|route| route.method.matches(method) && route.path.matches(&segments))
            .map(|route| ResolvedResource {
                service: Arc::clone(&entry.service),
                resource_id: route.resource_id,
                required_roles: Arc::clone(&route.required_roles),
                version: self.version,
            })
            .ok_or_else(not_found)
    }
}

fn validate_base_address(service: &Service) -> Result<(), RefreshError> {
    let url = Url::parse(&service.base_address).map_err(|e| {
        RefreshError::Inconsistent(format!(
            "service '{}' has invalid base address '{}': {}",
            service.service_name, service.base_address, e
        ))
    })?;

    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(()),
        _ => Err(RefreshError::Inconsistent(format!(
            "service '{}' base address must be an absolute http(s) URL",
            service.service_name
        ))),
    }
}
