use crate::config::toml_config::{ClientConfig, DEFAULT_IDEMPOTENCY_HEADER};
use crate::domain::model::{FetchRequest, HttpMethod, HttpResponse};
use crate::domain::ports::HttpTransport;
use crate::utils::error::{FetchError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
    idempotency_header: String,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.headers {
            default_headers.insert(parse_header_name(name)?, parse_header_value(name, value)?);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(default_headers)
            .build()?;

        Ok(Self {
            client,
            timeout: Duration::from_millis(config.timeout_ms),
            idempotency_header: config.idempotency_header.clone(),
        })
    }

    pub fn idempotency_header(&self) -> &str {
        &self.idempotency_header
    }

    /// The request timeout also covers reading the body.
    fn map_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::TimeoutError {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            FetchError::HttpError(e)
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(10),
            idempotency_header: DEFAULT_IDEMPOTENCY_HEADER.to_string(),
        }
    }
}

fn parse_header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::InvalidConfigValueError {
        field: "header".to_string(),
        value: name.to_string(),
        reason: e.to_string(),
    })
}

fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| FetchError::InvalidConfigValueError {
        field: format!("header {}", name),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &FetchRequest) -> Result<HttpResponse> {
        tracing::debug!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url)
            .timeout(self.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(parse_header_name(name)?, parse_header_value(name, value)?);
        }

        if let Some(key) = &request.idempotency_key {
            builder = builder.header(
                parse_header_name(&self.idempotency_header)?,
                parse_header_value(&self.idempotency_header, key)?,
            );
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(e))?
            .to_vec();

        tracing::debug!("{} {} -> {}", request.method, request.url, status);

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
