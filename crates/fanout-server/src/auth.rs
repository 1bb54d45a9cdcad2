//! Authorization service clients.
//!
//! The HTTP authorizer asks an external service two questions:
//!
//! - `GET {base}/videorooms/{id}/slots/{slot}`: `200 {"uid": ...}` names the
//!   slot's owner, `404` means the slot is unassigned.
//! - `POST {base}/verify-token` with `{"idToken": ...}`: `200 {"uid": ...}`
//!   for a valid token, any other status rejects it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use fanout_core::{AuthError, Authorizer, Identity, SlotOwner, StaticAuthorizer};
use fanout_protocol::control::Slot;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{AuthConfig, AuthMode};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyTokenRequest<'a> {
    id_token: &'a str,
}

/// Client for the HTTP authorization service.
#[derive(Debug, Clone)]
pub struct HttpAuthorizer {
    client: Client,
    base_url: Url,
}

impl HttpAuthorizer {
    /// Create a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid auth base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("Auth base URL cannot have a path: {}", base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AuthError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| AuthError::Unavailable("auth base URL cannot have a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn unavailable(e: reqwest::Error) -> AuthError {
    AuthError::Unavailable(e.to_string())
}

#[async_trait]
impl Authorizer for HttpAuthorizer {
    async fn resolve_slot(
        &self,
        videoroom_id: &str,
        slot: &Slot,
    ) -> Result<Option<SlotOwner>, AuthError> {
        let slot = slot.to_string();
        let url = self.endpoint(&["videorooms", videoroom_id, "slots", &slot])?;
        let response = self.client.get(url).send().await.map_err(unavailable)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let owner = response.json::<SlotOwner>().await.map_err(unavailable)?;
                Ok(Some(owner))
            }
            status => Err(AuthError::Unavailable(format!(
                "slot lookup returned {}",
                status
            ))),
        }
    }

    async fn verify_identity(&self, id_token: &str) -> Result<Identity, AuthError> {
        let url = self.endpoint(&["verify-token"])?;
        let response = self
            .client
            .post(url)
            .json(&VerifyTokenRequest { id_token })
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status.is_success() {
            response.json::<Identity>().await.map_err(unavailable)
        } else if status.is_server_error() {
            Err(AuthError::Unavailable(format!(
                "token verification returned {}",
                status
            )))
        } else {
            debug!(status = %status, "Token rejected");
            Err(AuthError::InvalidToken(status.to_string()))
        }
    }
}

/// Build the authorizer selected by configuration.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be created.
pub fn build_authorizer(config: &AuthConfig) -> Result<Arc<dyn Authorizer>> {
    match config.mode {
        AuthMode::Http => {
            let authorizer = HttpAuthorizer::new(
                &config.base_url,
                Duration::from_millis(config.timeout_ms),
            )?;
            info!("Authorizing joins against {}", config.base_url);
            Ok(Arc::new(authorizer))
        }
        AuthMode::Static => {
            let mut authorizer = StaticAuthorizer::new();
            for assignment in &config.slots {
                authorizer = authorizer.with_slot(
                    assignment.videoroom_id.clone(),
                    assignment.slot.clone(),
                    assignment.uid.clone(),
                );
            }
            for (token, uid) in &config.tokens {
                authorizer = authorizer.with_token(token.clone(), uid.clone());
            }
            info!(
                slots = config.slots.len(),
                tokens = config.tokens.len(),
                "Using static authorization tables"
            );
            Ok(Arc::new(authorizer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlotAssignment;
    use axum::extract::Path;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use fanout_core::auth::authorize;
    use fanout_protocol::control::JoinRequest;
    use serde_json::{json, Value};

    /// Mock service: room "abc" slot 1 belongs to u1, token "good" is u1.
    async fn spawn_service() -> String {
        let app = Router::new()
            .route(
                "/videorooms/:id/slots/:slot",
                get(|Path((id, slot)): Path<(String, String)>| async move {
                    if id == "abc" && slot == "1" {
                        Ok(Json(json!({ "uid": "u1" })))
                    } else {
                        Err(HttpStatus::NOT_FOUND)
                    }
                }),
            )
            .route(
                "/verify-token",
                post(|Json(body): Json<Value>| async move {
                    match body["idToken"].as_str() {
                        Some("good") => Ok(Json(json!({ "uid": "u1" }))),
                        Some("other") => Ok(Json(json!({ "uid": "u2" }))),
                        _ => Err(HttpStatus::UNAUTHORIZED),
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{}", addr)
    }

    fn request(slot: i64, token: &str) -> JoinRequest {
        JoinRequest {
            videoroom_id: "abc".into(),
            slot: Slot::Number(slot),
            id_token: token.into(),
            datagram_port: None,
        }
    }

    #[tokio::test]
    async fn test_http_authorizer_accepts_owner() {
        let authorizer = HttpAuthorizer::new(&spawn_service().await, Duration::from_secs(5)).unwrap();
        let identity = authorize(&authorizer, &request(1, "good")).await.unwrap();
        assert_eq!(identity.uid, "u1");
    }

    #[tokio::test]
    async fn test_http_authorizer_denials() {
        let authorizer = HttpAuthorizer::new(&spawn_service().await, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            authorize(&authorizer, &request(2, "good")).await,
            Err(AuthError::SlotUnassigned { .. })
        ));
        assert!(matches!(
            authorize(&authorizer, &request(1, "forged")).await,
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            authorize(&authorizer, &request(1, "other")).await,
            Err(AuthError::IdentityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_denies() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let authorizer = HttpAuthorizer::new(&url, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            authorize(&authorizer, &request(1, "good")).await,
            Err(AuthError::Unavailable(_))
        ));
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let authorizer =
            HttpAuthorizer::new("http://auth.local/api/", Duration::from_secs(1)).unwrap();
        let url = authorizer
            .endpoint(&["videorooms", "a b/c", "slots", "1"])
            .unwrap();
        assert_eq!(url.as_str(), "http://auth.local/api/videorooms/a%20b%2Fc/slots/1");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpAuthorizer::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpAuthorizer::new("mailto:auth@example.com", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_build_static_authorizer() {
        let mut config = AuthConfig {
            mode: AuthMode::Static,
            ..AuthConfig::default()
        };
        config.slots.push(SlotAssignment {
            videoroom_id: "abc".into(),
            slot: Slot::Number(1),
            uid: "u1".into(),
        });
        config.tokens.insert("dev".into(), "u1".into());

        let authorizer = build_authorizer(&config).unwrap();
        assert!(authorize(authorizer.as_ref(), &request(1, "dev")).await.is_ok());
        assert!(authorize(authorizer.as_ref(), &request(1, "nope")).await.is_err());
    }
}
