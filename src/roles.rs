//! Healthcare-role lookups against the external Auth/User service. Only the
//! emergency branch of the decision cascade consults this; a lookup failure
//! is an infrastructure error, never a denial.

use crate::access::errors::AccessError;
use crate::access::types::HealthcareRole;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn healthcare_role(&self, user_id: &str)
        -> Result<Option<HealthcareRole>, AccessError>;
}

pub struct HttpRoleDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRoleDirectory {
    pub fn new(base_url: &str, request_timeout_ms: u64) -> Result<Self, AccessError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .map_err(|e| AccessError::RoleLookup(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RoleResponse {
    healthcare_role: Option<String>,
}

#[async_trait]
impl RoleDirectory for HttpRoleDirectory {
    async fn healthcare_role(
        &self,
        user_id: &str,
    ) -> Result<Option<HealthcareRole>, AccessError> {
        let url = format!("{}/users/{}/role", self.base_url, user_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AccessError::RoleLookup(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| AccessError::RoleLookup(e.to_string()))?;
        let body: RoleResponse = response
            .json()
            .await
            .map_err(|e| AccessError::RoleLookup(e.to_string()))?;

        match body.healthcare_role {
            None => Ok(None),
            Some(raw) => raw
                .parse::<HealthcareRole>()
                .map(Some)
                .map_err(AccessError::RoleLookup),
        }
    }
}

/// In-memory directory for tests and local development.
#[derive(Default)]
pub struct StaticRoleDirectory {
    roles: HashMap<String, HealthcareRole>,
}

impl StaticRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, user_id: impl Into<String>, role: HealthcareRole) -> Self {
        self.roles.insert(user_id.into(), role);
        self
    }
}

#[async_trait]
impl RoleDirectory for StaticRoleDirectory {
    async fn healthcare_role(
        &self,
        user_id: &str,
    ) -> Result<Option<HealthcareRole>, AccessError> {
        Ok(self.roles.get(user_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_lookup() {
        let dir = StaticRoleDirectory::new()
            .with_role("dr-house", HealthcareRole::CareStaff)
            .with_role("ops-admin", HealthcareRole::Admin);

        assert_eq!(
            dir.healthcare_role("dr-house").await.unwrap(),
            Some(HealthcareRole::CareStaff)
        );
        assert_eq!(dir.healthcare_role("stranger").await.unwrap(), None);
    }
}
