use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::FleetApiConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// One candidate request against the fleet API: method, path relative to the
/// configured base URL, optional query parameters and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestDescriptor {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Patch,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Value, ApiError>;
}

#[derive(Clone)]
pub struct ReqwestRestTransport {
    base_url: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl fmt::Debug for ReqwestRestTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ReqwestRestTransport")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("client", &self.client)
            .finish()
    }
}

impl ReqwestRestTransport {
    pub fn new(config: &FleetApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent("curbsync/fleet-api")
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| {
                ApiError::Transport(format!("failed to initialize fleet HTTP client: {err}"))
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_token: config.api_token.clone(),
            client,
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RestTransport for ReqwestRestTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Value, ApiError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, self.url_for(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| {
            ApiError::Transport(format!(
                "failed to call fleet API {} {}: {err}",
                request.method.as_str(),
                request.path
            ))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            ApiError::Transport(format!(
                "failed to read fleet API response for {}: {err}",
                request.path
            ))
        })?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: truncate_for_error(&body),
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| {
            ApiError::Decode(format!(
                "failed to parse fleet API response JSON for {}: {err}",
                request.path
            ))
        })
    }
}

fn truncate_for_error(body: &str) -> String {
    const MAX_LEN: usize = 200;
    if body.chars().count() <= MAX_LEN {
        body.to_owned()
    } else {
        format!("{}...", body.chars().take(MAX_LEN).collect::<String>())
    }
}
