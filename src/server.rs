//! Cards server transport.
//!
//! Two endpoints, both `POST` with a form-encoded body:
//!
//! - `notifications`: `q=<lat>,<lon>,<accuracy>`, answers with the cards JSON
//! - `dismiss`: `id=<notificationId>&dismissalAge=<ms>`
//!
//! Only HTTP 200 counts as success.

use crate::config::CardsConfig;
use crate::error::{CardsError, Result};
use crate::location::Position;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use url::Url;

/// Network contract with the cards server.
#[async_trait]
pub trait CardsServer: Send + Sync {
    /// Request cards for `position`. Returns the raw response body.
    async fn request_cards(&self, position: &Position) -> Result<String>;

    /// Report a user dismissal made `dismissal_age_ms` ago.
    async fn request_dismissal(&self, notification_id: &str, dismissal_age_ms: u64) -> Result<()>;
}

/// [`CardsServer`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCardsServer {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpCardsServer {
    /// Build a server client from `[server]` settings.
    ///
    /// # Errors
    ///
    /// Returns [`CardsError::Config`] if `base_url` is unset or invalid and
    /// [`CardsError::Http`] if the HTTP client cannot be constructed.
    pub fn from_config(config: &CardsConfig) -> Result<Self> {
        let base = config
            .server
            .base_url
            .as_deref()
            .ok_or_else(|| CardsError::Config("server.base_url is not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("now-cards/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CardsError::Http(format!("failed to build HTTP client: {e}")))?;

        Self::with_client(client, base)
    }

    /// Use an existing client against `base_url`.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self> {
        Ok(Self {
            client,
            base_url: parse_base_url(base_url)?,
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        self.base_url
            .join(name)
            .map_err(|e| CardsError::Config(format!("invalid endpoint {name}: {e}")))
    }

    async fn post_form<F>(&self, name: &str, form: &F) -> Result<reqwest::Response>
    where
        F: Serialize + ?Sized,
    {
        let url = self.endpoint(name)?;
        debug!(endpoint = name, %url, "sending server request");

        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| CardsError::Http(format!("{name} request failed: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(CardsError::Status {
                endpoint: name.to_owned(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

/// Parse `raw` and make sure relative joins land below its path.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| CardsError::Config(format!("invalid server URL {raw}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[async_trait]
impl CardsServer for HttpCardsServer {
    async fn request_cards(&self, position: &Position) -> Result<String> {
        let response = self
            .post_form("notifications", &[("q", position.to_query())])
            .await?;
        response
            .text()
            .await
            .map_err(|e| CardsError::Http(format!("failed to read notifications body: {e}")))
    }

    async fn request_dismissal(&self, notification_id: &str, dismissal_age_ms: u64) -> Result<()> {
        let form = [
            ("id", notification_id.to_owned()),
            ("dismissalAge", dismissal_age_ms.to_string()),
        ];
        self.post_form("dismiss", &form).await.map(|_| ())
    }
}
