//! Username admission checks run before a connection joins the hub.

use crate::config::UsernameConfig;
use crate::hub::Hub;
use log::warn;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const MODERATION_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameRejection {
    #[error("Username must be between 1 and {0} characters")]
    BadLength(usize),
    #[error("Username is already in use")]
    InUse,
    #[error("Username is inappropriate")]
    Inappropriate,
}

/// Client for a text moderation service answering `true` or `false` to
/// `GET <endpoint>?text=<text>`.
#[derive(Debug, Clone)]
pub struct ModerationClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ModerationClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = match reqwest::Client::builder().timeout(MODERATION_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Could not configure moderation client: {}, using defaults", e);
                reqwest::Client::new()
            }
        };
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub async fn is_profane(&self, text: &str) -> Result<bool, reqwest::Error> {
        let body = self
            .http
            .get(&self.endpoint)
            .query(&[("text", text)])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body.trim() == "true")
    }
}

#[derive(Debug, Clone)]
pub struct UsernameGate {
    max_len: usize,
    moderation: Option<Arc<ModerationClient>>,
}

impl UsernameGate {
    pub fn new(config: &UsernameConfig) -> Self {
        Self {
            max_len: config.max_len,
            moderation: config
                .moderation_endpoint
                .as_ref()
                .map(|endpoint| Arc::new(ModerationClient::new(endpoint.clone()))),
        }
    }

    /// Length check, done during the WebSocket handshake.
    pub fn check_shape(&self, username: &str) -> Result<(), UsernameRejection> {
        let len = username.chars().count();
        if len == 0 || len > self.max_len {
            return Err(UsernameRejection::BadLength(self.max_len));
        }
        Ok(())
    }

    /// Uniqueness and moderation checks. An unreachable moderation service
    /// lets the name through.
    pub async fn check_availability(
        &self,
        hub: &Hub,
        username: &str,
    ) -> Result<(), UsernameRejection> {
        if hub.username_taken(username).await {
            return Err(UsernameRejection::InUse);
        }

        if let Some(moderation) = &self.moderation {
            match moderation.is_profane(username).await {
                Ok(true) => return Err(UsernameRejection::Inappropriate),
                Ok(false) => {}
                Err(e) => warn!("Moderation check for {:?} failed, allowing it: {}", username, e),
            }
        }

        Ok(())
    }
}

/// Extracts the `username` query parameter from a request target such as
/// `/ws?username=alice`.
pub fn username_from_uri(uri: &str) -> Option<String> {
    let url = Url::parse(&format!("http://localhost{}", uri)).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "username")
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::hub::HubRequest;
    use crate::world::MapData;
    use crate::client_manager::outbound_queue;

    fn offline_gate() -> UsernameGate {
        UsernameGate::new(&UsernameConfig {
            moderation_endpoint: None,
            ..UsernameConfig::default()
        })
    }

    #[test]
    fn test_shape_limits() {
        let gate = offline_gate();

        assert_eq!(gate.check_shape(""), Err(UsernameRejection::BadLength(15)));
        assert!(gate.check_shape("a").is_ok());
        assert!(gate.check_shape("fifteen_chars__").is_ok());
        assert_eq!(
            gate.check_shape("sixteen_chars___"),
            Err(UsernameRejection::BadLength(15))
        );
        // Counted in characters, not bytes
        assert!(gate.check_shape(&"ä".repeat(15)).is_ok());
    }

    #[test]
    fn test_username_from_uri() {
        assert_eq!(username_from_uri("/ws?username=alice"), Some("alice".to_string()));
        assert_eq!(
            username_from_uri("/ws?foo=1&username=bob%20smith"),
            Some("bob smith".to_string())
        );
        assert_eq!(username_from_uri("/ws?username="), Some(String::new()));
        assert_eq!(username_from_uri("/ws"), None);
    }

    #[tokio::test]
    async fn test_name_in_use_is_rejected() {
        let hub = Hub::new(&MapData::default(), &ServerConfig::default());
        let gate = offline_gate();
        assert!(gate.check_availability(&hub, "alice").await.is_ok());

        let (tx, _rx) = outbound_queue(4);
        hub.handle(HubRequest::Join {
            conn: hub.next_connection_id(),
            username: "alice".to_string(),
            outgoing: tx,
        })
        .await;

        assert_eq!(
            gate.check_availability(&hub, "alice").await,
            Err(UsernameRejection::InUse)
        );
        assert!(gate.check_availability(&hub, "bob").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_moderation_fails_open() {
        let hub = Hub::new(&MapData::default(), &ServerConfig::default());
        let gate = UsernameGate::new(&UsernameConfig {
            moderation_endpoint: Some("http://127.0.0.1:9/containsprofanity".to_string()),
            ..UsernameConfig::default()
        });

        assert!(gate.check_availability(&hub, "alice").await.is_ok());
    }
}
