use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// A user record in the hosted identity service.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityUser {
    pub id: Uuid,
    pub email: String,
}

/// Creation request for a fulfillment-provisioned account.
#[derive(Debug, Clone, Serialize)]
pub struct NewIdentity {
    pub email: String,
    pub password: String,
    pub full_name: String,
    /// Marks the email as confirmed so the buyer can log in immediately
    pub pre_verified: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Case-insensitive lookup by email. One identity record exists per
    /// unique email, so at most one match is possible.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<IdentityUser>, ServiceError>;

    /// Creates a new identity with a bootstrap password.
    async fn create_user(&self, new_user: NewIdentity) -> Result<IdentityUser, ServiceError>;
}

/// Admin REST client for a GoTrue-style hosted auth service. The admin API
/// exposes no indexed email query, so lookup scans the user listing.
#[derive(Debug, Clone)]
pub struct AuthAdminClient {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct UserListResponse {
    users: Vec<IdentityUser>,
}

impl AuthAdminClient {
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            service_key: service_key.into(),
        })
    }

    fn admin_users_url(&self) -> String {
        format!("{}/auth/v1/admin/users", self.base_url)
    }
}

#[async_trait]
impl IdentityProvider for AuthAdminClient {
    #[instrument(skip(self))]
    async fn find_user_by_email(&self, email: &str) -> Result<Option<IdentityUser>, ServiceError> {
        let response = self
            .http
            .get(self.admin_users_url())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("identity lookup: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "identity lookup returned status {}",
                response.status()
            )));
        }

        let listing: UserListResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("identity lookup response: {}", e))
        })?;

        Ok(listing
            .users
            .into_iter()
            .find(|user| user.email.eq_ignore_ascii_case(email)))
    }

    #[instrument(skip(self, new_user), fields(email = %new_user.email))]
    async fn create_user(&self, new_user: NewIdentity) -> Result<IdentityUser, ServiceError> {
        let body = json!({
            "email": new_user.email,
            "password": new_user.password,
            "email_confirm": new_user.pre_verified,
            "user_metadata": { "full_name": new_user.full_name },
        });

        let response = self
            .http
            .post(self.admin_users_url())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::IdentityProvisioning(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::IdentityProvisioning(format!(
                "identity creation returned status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::IdentityProvisioning(format!("creation response: {}", e)))
    }
}
