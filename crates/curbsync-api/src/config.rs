use std::fmt;
use std::time::Duration;

use crate::error::ApiError;

const DEFAULT_FLEET_API_URL: &str = "http://127.0.0.1:8080/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Clone)]
pub struct FleetApiConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
}

impl fmt::Debug for FleetApiConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FleetApiConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for FleetApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FLEET_API_URL.to_owned(),
            api_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl FleetApiConfig {
    pub fn from_env() -> Result<Self, ApiError> {
        let base_url = std::env::var("CURBSYNC_API_URL").map_err(|_| {
            ApiError::Configuration(
                "CURBSYNC_API_URL is not set. Export the fleet API base URL before using curbsync-api."
                    .to_owned(),
            )
        })?;
        let base_url = base_url.trim();
        if base_url.is_empty() {
            return Err(ApiError::Configuration(
                "CURBSYNC_API_URL is empty. Provide a non-empty base URL.".to_owned(),
            ));
        }

        let mut config = Self {
            base_url: base_url.to_owned(),
            ..Self::default()
        };
        if let Ok(token) = std::env::var("CURBSYNC_API_TOKEN") {
            let token = token.trim();
            if !token.is_empty() {
                config.api_token = Some(token.to_owned());
            }
        }
        if let Ok(raw) = std::env::var("CURBSYNC_API_TIMEOUT_SECS") {
            config.request_timeout = parse_timeout_secs(&raw)?;
        }

        Ok(config)
    }
}

fn parse_timeout_secs(value: &str) -> Result<Duration, ApiError> {
    let seconds = value.trim().parse::<u64>().map_err(|_| {
        ApiError::Configuration("CURBSYNC_API_TIMEOUT_SECS must be an unsigned integer.".to_owned())
    })?;
    if seconds == 0 {
        return Err(ApiError::Configuration(
            "CURBSYNC_API_TIMEOUT_SECS must be greater than zero.".to_owned(),
        ));
    }

    Ok(Duration::from_secs(seconds))
}
