use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::Response;
use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use super::RemoteError;
use super::WatchService;
use crate::config::AccountConfig;
use crate::watch::CommandField;
use crate::watch::RawTelemetry;
use crate::watch::WatchId;

#[derive(Serialize)]
struct CommandBody {
    enabled: bool,
}

/// JSON-over-HTTP client for a watch gateway.
///
/// `GET {base}/watches/{id}` returns [`RawTelemetry`];
/// `POST {base}/watches/{id}/{field}` with `{"enabled": bool}` changes a switch.
pub struct HttpWatchService {
    client: Client,
    base_url: Url,
    username: String,
    password: String,
    timeout: Duration,
}

impl HttpWatchService {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid gateway base_url")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Gateway base_url cannot be a base: {}", base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("xplorad/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            username: username.into(),
            password: password.into(),
            timeout,
        })
    }

    pub fn from_config(account: &AccountConfig, timeout: Duration) -> anyhow::Result<Self> {
        Self::new(
            &account.base_url,
            account.username.clone(),
            account.password.clone(),
            timeout,
        )
    }

    fn watch_url(&self, watch: &WatchId, field: Option<CommandField>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("watches").push(watch.as_str());
            if let Some(field) = field {
                segments.push(&field.to_string());
            }
        }
        url
    }

    fn transport_error(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else if e.is_decode() {
            RemoteError::InvalidPayload(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }

    async fn check_status(response: Response, watch: &WatchId) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), message, watch))
    }
}

#[async_trait]
impl WatchService for HttpWatchService {
    async fn fetch_state(&self, watch: &WatchId) -> Result<RawTelemetry, RemoteError> {
        let url = self.watch_url(watch, None);
        debug!("[{}] GET {}", watch, url);

        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        Self::check_status(response, watch)
            .await?
            .json::<RawTelemetry>()
            .await
            .map_err(|e| self.transport_error(e))
    }

    async fn send_command(
        &self,
        watch: &WatchId,
        field: CommandField,
        value: bool,
    ) -> Result<(), RemoteError> {
        let url = self.watch_url(watch, Some(field));
        debug!("[{}] POST {} enabled={}", watch, url, value);

        let response = self
            .client
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&CommandBody { enabled: value })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        Self::check_status(response, watch).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(base: &str) -> HttpWatchService {
        HttpWatchService::new(base, "user", "pass", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_watch_url() {
        let svc = service("https://gateway.example/api");
        let url = svc.watch_url(&WatchId::new("w-1"), None);
        assert_eq!(url.as_str(), "https://gateway.example/api/watches/w-1");
    }

    #[test]
    fn test_watch_url_trailing_slash_and_field() {
        let svc = service("https://gateway.example/api/");
        let url = svc.watch_url(&WatchId::new("w-1"), Some(CommandField::Silent));
        assert_eq!(
            url.as_str(),
            "https://gateway.example/api/watches/w-1/silent"
        );
    }

    #[test]
    fn test_watch_url_escapes_id() {
        let svc = service("https://gateway.example");
        let url = svc.watch_url(&WatchId::new("kid watch/2"), None);
        assert_eq!(
            url.as_str(),
            "https://gateway.example/watches/kid%20watch%2F2"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpWatchService::new("not a url", "u", "p", Duration::from_secs(1)).is_err());
        assert!(HttpWatchService::new("mailto:x@y", "u", "p", Duration::from_secs(1)).is_err());
    }
}
