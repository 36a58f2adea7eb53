//! HTTP client for the organization API.

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

use super::types::{LoginResponse, Organization, OrganizationStatsResponse, UserProfileResponse};
use super::{ApiError, ApiFuture, PortalApi};

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// API error body, e.g. `{"message": "Organization not found"}`
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(alias = "error")]
    message: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// `PortalApi` implementation talking to the portal backend over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpPortalApi {
    base_url: String,
}

impl HttpPortalApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str, token: &str) -> RequestBuilder {
        get_http_client()
            .get(self.url(path))
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json")
    }
}

/// Send a request and decode the JSON body, mapping failures to `ApiError`.
async fn send_json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T, ApiError> {
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::Network(format!("{}: {}", what, e)))?;

    let response = check_status(response, what).await?;

    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::Parse(format!("{}: {}", what, e)))
}

async fn check_status(response: Response, what: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
        Ok(err) => err.message,
        Err(_) => body,
    };

    log::warn!("API: {} failed ({}): {}", what, status.as_u16(), message);

    Err(match status.as_u16() {
        401 => ApiError::Unauthorized,
        code => ApiError::Api {
            status: code,
            message,
        },
    })
}

impl PortalApi for HttpPortalApi {
    fn user_profile<'a>(&'a self, token: &'a str) -> ApiFuture<'a, UserProfileResponse> {
        Box::pin(async move {
            let profile: UserProfileResponse =
                send_json(self.get("/auth/profile", token), "user profile").await?;
            if !profile.success {
                return Err(ApiError::Unsuccessful("user profile".to_string()));
            }
            Ok(profile)
        })
    }

    fn organization<'a>(&'a self, id: &'a str, token: &'a str) -> ApiFuture<'a, Organization> {
        Box::pin(async move {
            let path = format!("/organizations/{}", id);
            send_json(self.get(&path, token), "organization").await
        })
    }

    fn organization_stats<'a>(
        &'a self,
        org_id: &'a str,
        token: &'a str,
    ) -> ApiFuture<'a, OrganizationStatsResponse> {
        Box::pin(async move {
            let path = format!("/organizations/{}/stats", org_id);
            send_json(self.get(&path, token), "organization stats").await
        })
    }

    fn login<'a>(&'a self, email: &'a str, password: &'a str) -> ApiFuture<'a, LoginResponse> {
        Box::pin(async move {
            log::info!("API: logging in");
            let request = get_http_client()
                .post(self.url("/auth/login"))
                .json(&LoginRequest { email, password });
            send_json(request, "login").await
        })
    }
}
