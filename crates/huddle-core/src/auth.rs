use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::SessionConfig;
use crate::errors::HuddleError;

/// Issues access tokens for the real-time engine.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self, room_name: &str, participant_name: &str) -> Result<String, HuddleError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    room_name: &'a str,
    participant_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Fetches tokens from the application server over HTTP.
pub struct HttpTokenProvider {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTokenProvider {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, HuddleError> {
        Ok(Self::new(config.token_endpoint()?))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self, room_name: &str, participant_name: &str) -> Result<String, HuddleError> {
        tracing::info!("requesting token from {} for {participant_name}", self.endpoint);

        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&TokenRequest {
                room_name,
                participant_name,
            })
            .send()
            .await
            .map_err(|e| HuddleError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(HuddleError::Auth(format!(
                "token service returned status {}",
                resp.status()
            )));
        }

        let data: TokenResponse = resp
            .json()
            .await
            .map_err(|e| HuddleError::Auth(format!("invalid token response: {e}")))?;
        Ok(data.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_is_camel_case() {
        let body = serde_json::to_value(TokenRequest {
            room_name: "Test Room",
            participant_name: "Ana-42",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"roomName": "Test Room", "participantName": "Ana-42"})
        );
    }

    #[test]
    fn response_ignores_extra_fields() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"token":"abc.def","expires":3600}"#).unwrap();
        assert_eq!(resp.token, "abc.def");
    }

    #[test]
    fn endpoint_from_config() {
        let provider = HttpTokenProvider::from_config(&SessionConfig::default()).unwrap();
        assert_eq!(provider.endpoint().as_str(), "http://127.0.0.1:6080/token");
    }
}
