use async_trait::async_trait;
use deckmusic_core::{
    BackendConfig, CoreError, FrontendSettings, LyricRequest, LyricResponse, MusicBackend,
    ProviderInfo, SettingsStore, StreamUrlRequest, StreamUrlResponse,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Connect timeout, independent of the configured request timeout
const CONNECT_TIMEOUT_SECS: u64 = 5;

const USER_AGENT: &str = concat!("deckmusic/", env!("CARGO_PKG_VERSION"));

/// Plugin backend reached over HTTP.
///
/// Every backend callable is a `POST {base_url}/{method}` with the call's
/// arguments as a JSON object. Answers carry a `success` flag and, on
/// failure, an `error` string.
pub struct RpcBackend {
    client: ClientWithMiddleware,
    base_url: Url,
}

impl RpcBackend {
    /// Create a backend client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be created.
    pub fn new(config: &BackendConfig) -> Result<Self, CoreError> {
        let base_url = parse_base_url(&config.base_url)?;

        let base_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CoreError::Backend {
                operation: "client",
                reason: e.to_string(),
            })?;

        // Transient failures (connect errors, 5xx, 429) are retried with backoff
        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        info!("Backend client targeting {}", base_url);
        Ok(Self { client, base_url })
    }

    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, method: &'static str) -> Result<Url, CoreError> {
        self.base_url.join(method).map_err(|e| CoreError::Backend {
            operation: method,
            reason: e.to_string(),
        })
    }

    /// Invoke a backend callable and decode its JSON answer.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        args: &Value,
    ) -> Result<T, CoreError> {
        let url = self.endpoint(method)?;
        debug!("Backend call {} -> {}", method, url);

        let transport = |reason: String| CoreError::Backend {
            operation: method,
            reason,
        };

        let response = self
            .client
            .post(url)
            .json(args)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Backend call {} returned status: {}", method, status);
            return Err(transport(format!("backend returned status: {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| transport(format!("malformed answer: {e}")))
    }
}

fn parse_base_url(raw: &str) -> Result<Url, CoreError> {
    // `Url::join` replaces the last path segment unless the base ends with a slash
    let raw = raw.trim();
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&normalized).map_err(|e| CoreError::ConfigInvalid {
        message: format!("backend.base_url {raw:?}: {e}"),
    })?;
    if url.cannot_be_a_base() {
        return Err(CoreError::ConfigInvalid {
            message: format!("backend.base_url {raw:?} cannot be used as a base URL"),
        });
    }
    Ok(url)
}

fn ensure_success(
    operation: &'static str,
    success: bool,
    error: Option<String>,
) -> Result<(), CoreError> {
    if success {
        Ok(())
    } else {
        Err(CoreError::BackendRejected {
            operation,
            reason: error.unwrap_or_else(|| "no reason given".to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProviderEnvelope {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    provider: Option<ProviderInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastProviderEnvelope {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, alias = "last_provider_id")]
    last_provider_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SettingsEnvelope {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    settings: Option<FrontendSettings>,
}

#[derive(Debug, Deserialize)]
struct AckEnvelope {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

impl ProviderEnvelope {
    fn into_provider(self) -> Result<Option<ProviderInfo>, CoreError> {
        ensure_success("get_current_provider", self.success, self.error)?;
        Ok(self.provider.filter(|p| !p.id.is_empty()))
    }
}

impl LastProviderEnvelope {
    fn into_provider_id(self) -> Result<Option<String>, CoreError> {
        ensure_success("get_last_provider_id", self.success, self.error)?;
        Ok(self.last_provider_id.filter(|id| !id.is_empty()))
    }
}

impl SettingsEnvelope {
    fn into_settings(self) -> Result<Option<FrontendSettings>, CoreError> {
        ensure_success("get_frontend_settings", self.success, self.error)?;
        Ok(self.settings)
    }
}

fn stream_url_args(request: &StreamUrlRequest) -> Value {
    json!({
        "mid": request.mid,
        "preferred_quality": request.quality.as_str(),
        "name": request.name,
        "singer": request.artist,
    })
}

fn lyric_args(request: &LyricRequest) -> Value {
    json!({
        "mid": request.mid,
        "qrc": request.want_translation,
        "name": request.name,
        "singer": request.artist,
    })
}

#[async_trait]
impl MusicBackend for RpcBackend {
    async fn resolve_stream_url(
        &self,
        request: &StreamUrlRequest,
    ) -> Result<StreamUrlResponse, CoreError> {
        let response: StreamUrlResponse =
            self.call("get_song_url", &stream_url_args(request)).await?;
        if !response.success {
            info!(
                "No stream URL for {}: {}",
                request.mid,
                response.error.as_deref().unwrap_or("unknown")
            );
        }
        Ok(response)
    }

    async fn resolve_lyric(&self, request: &LyricRequest) -> Result<LyricResponse, CoreError> {
        self.call("get_song_lyric", &lyric_args(request)).await
    }

    async fn current_provider(&self) -> Result<Option<ProviderInfo>, CoreError> {
        let envelope: ProviderEnvelope = self.call("get_current_provider", &json!({})).await?;
        envelope.into_provider()
    }

    async fn last_provider_id(&self) -> Result<Option<String>, CoreError> {
        let envelope: LastProviderEnvelope =
            self.call("get_last_provider_id", &json!({})).await?;
        envelope.into_provider_id()
    }

    async fn switch_provider(&self, provider_id: &str) -> Result<(), CoreError> {
        let ack: AckEnvelope = self
            .call("switch_provider", &json!({ "provider_id": provider_id }))
            .await?;
        ensure_success("switch_provider", ack.success, ack.error)?;
        info!("Backend switched to provider {}", provider_id);
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for RpcBackend {
    async fn load_settings(&self) -> Result<Option<FrontendSettings>, CoreError> {
        let envelope: SettingsEnvelope = self.call("get_frontend_settings", &json!({})).await?;
        envelope.into_settings()
    }

    async fn save_settings(&self, settings: &FrontendSettings) -> Result<(), CoreError> {
        let ack: AckEnvelope = self
            .call("save_frontend_settings", &json!({ "settings": settings }))
            .await?;
        ensure_success("save_frontend_settings", ack.success, ack.error)
    }
}
