use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use crate::{AuthError, AuthenticationService};

/// Connection settings for the user management service.
#[derive(Debug, Clone)]
pub struct UserManagementSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub service_token: Option<String>,
}

/// [`AuthenticationService`] backed by the user management HTTP API.
///
/// Tokens are resolved with `GET {base_url}/auth/token/{token}`.
#[derive(Debug, Clone)]
pub struct UserManagementClient {
    base_url: Url,
    client: Client,
    service_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    user_id: String,
}

impl UserManagementClient {
    pub fn new(settings: UserManagementSettings) -> Result<Self, AuthError> {
        let base_url = Url::parse(&settings.base_url).map_err(|err| {
            AuthError::Unexpected(format!(
                "invalid user management url {}: {err}",
                settings.base_url
            ))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AuthError::Unexpected(format!(
                "user management url {} cannot be used as a base",
                settings.base_url
            )));
        }

        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| AuthError::Unexpected(format!("failed to build http client: {err}")))?;

        Ok(Self {
            base_url,
            client,
            service_token: settings.service_token.filter(|token| !token.is_empty()),
        })
    }

    fn token_url(&self, token: &str) -> Result<Url, AuthError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AuthError::Unexpected("user management url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["auth", "token", token]);
        Ok(url)
    }
}

#[async_trait]
impl AuthenticationService for UserManagementClient {
    async fn validate_token(&self, token: &str) -> Result<Option<String>, AuthError> {
        let url = self.token_url(token)?;
        let mut request = self.client.get(url);
        if let Some(service_token) = &self.service_token {
            request = request.bearer_auth(service_token);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        tracing::debug!(status = status.as_u16(), "user management replied");

        match status {
            StatusCode::OK => {
                let body = response.json::<TokenResponse>().await.map_err(|err| {
                    AuthError::Unexpected(format!("malformed user management reply: {err}"))
                })?;
                Ok(Some(body.user_id))
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::Unauthorized),
            status if status.is_server_error() => Err(AuthError::FailedDependency(format!(
                "user management responded with status {status}"
            ))),
            status => Err(AuthError::Unexpected(format!(
                "user management responded with status {status}"
            ))),
        }
    }
}

fn classify_transport_error(error: reqwest::Error) -> AuthError {
    if error.is_builder() {
        AuthError::Unexpected(error.to_string())
    } else if error.is_timeout() {
        AuthError::FailedDependency("request to user management timed out".to_string())
    } else {
        AuthError::FailedDependency(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> UserManagementClient {
        UserManagementClient::new(UserManagementSettings {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(1),
            service_token: None,
        })
        .expect("client")
    }

    #[test]
    fn token_is_a_single_encoded_segment() {
        let url = client("http://127.0.0.1:20001").token_url("a/b c").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:20001/auth/token/a%2Fb%20c");
    }

    #[test]
    fn base_path_is_preserved() {
        let url = client("http://um.local/api/").token_url("T1").unwrap();
        assert_eq!(url.as_str(), "http://um.local/api/auth/token/T1");
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = UserManagementClient::new(UserManagementSettings {
            base_url: "not a url".to_string(),
            timeout: Duration::from_secs(1),
            service_token: None,
        });
        assert!(matches!(result, Err(AuthError::Unexpected(_))));
    }

    #[test]
    fn empty_service_token_is_ignored() {
        let client = UserManagementClient::new(UserManagementSettings {
            base_url: "http://127.0.0.1:20001".to_string(),
            timeout: Duration::from_secs(1),
            service_token: Some(String::new()),
        })
        .unwrap();
        assert!(client.service_token.is_none());
    }
}
