// HTTP JSON transport and the device endpoints built on top of it.
//
// `JsonTransport` is the seam between request construction and request
// execution: `HttpTransport` executes over reqwest, tests substitute an
// in-memory fake. `DeviceApi` knows the endpoint paths and headers.

use std::future::Future;

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{
    BatteriesData, BatteryMode, BatteryModeRequest, DeviceInfo, TokenRequest, TokenResponse,
};
use crate::transport::TransportConfig;

/// Value of the `X-Api-Version` header sent on every request.
pub const API_VERSION: &str = "2";

/// One JSON request: method, absolute URL, optional body, extra headers.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<serde_json::Value>,
    pub headers: HeaderMap,
}

impl JsonRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn json(mut self, body: &impl Serialize) -> Result<Self, Error> {
        let value = serde_json::to_value(body).map_err(|e| Error::Deserialization {
            message: format!("failed to encode request body: {e}"),
            body: String::new(),
        })?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Executes a single JSON request.
///
/// Returns the decoded JSON body on a 2xx status, or [`Error::Http`]
/// carrying the status code and raw body otherwise.
pub trait JsonTransport: Send + Sync {
    fn execute(
        &self,
        request: JsonRequest,
    ) -> impl Future<Output = Result<serde_json::Value, Error>> + Send;
}

/// [`JsonTransport`] over a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: config.build_client()?,
        })
    }

    /// Wrap a pre-built client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl JsonTransport for HttpTransport {
    async fn execute(&self, request: JsonRequest) -> Result<serde_json::Value, Error> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(Error::Transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| Error::deserialization(&e, &body))
    }
}

// ── Device endpoints ─────────────────────────────────────────────────

/// Base URL of a device's local API (`https://<host>`).
pub fn device_base_url(host: &str) -> Result<Url, Error> {
    Ok(Url::parse(&format!("https://{host}"))?)
}

/// Endpoint client for the device v2 HTTP API.
#[derive(Debug, Clone)]
pub struct DeviceApi<T> {
    transport: T,
}

impl<T: JsonTransport> DeviceApi<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// `POST /api/user` with `{"name": "local/<name>"}`.
    ///
    /// Until the button on the device is pressed this fails with
    /// [`Error::Http`] status 403 (see [`Error::is_authorization_pending`]).
    pub async fn request_token(&self, base: &Url, name: &str) -> Result<SecretString, Error> {
        let request = JsonRequest::new(Method::POST, base.join("api/user")?)
            .json(&TokenRequest {
                name: format!("local/{name}"),
            })?
            .header(version_header(), HeaderValue::from_static(API_VERSION))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let resp: TokenResponse = self.call(request).await?;
        Ok(SecretString::from(resp.token))
    }

    /// `PUT /api/batteries` with `{"mode": "<mode>"}`.
    pub async fn set_battery_mode(
        &self,
        base: &Url,
        token: &SecretString,
        mode: BatteryMode,
    ) -> Result<BatteriesData, Error> {
        let request = JsonRequest::new(Method::PUT, base.join("api/batteries")?)
            .json(&BatteryModeRequest { mode })?
            .header(AUTHORIZATION, bearer(token)?)
            .header(version_header(), HeaderValue::from_static(API_VERSION))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("application/json"));

        self.call(request).await
    }

    /// `GET /api` -- unauthenticated product identification.
    pub async fn device_info(&self, base: &Url) -> Result<DeviceInfo, Error> {
        let request = JsonRequest::new(Method::GET, base.join("api")?)
            .header(version_header(), HeaderValue::from_static(API_VERSION));
        self.call(request).await
    }

    async fn call<R: DeserializeOwned>(&self, request: JsonRequest) -> Result<R, Error> {
        let value = self.transport.execute(request).await?;
        R::deserialize(&value).map_err(|e| Error::deserialization(&e, &value.to_string()))
    }
}

fn version_header() -> HeaderName {
    HeaderName::from_static("x-api-version")
}

fn bearer(token: &SecretString) -> Result<HeaderValue, Error> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
        .map_err(|_| Error::Authentication {
            message: "token contains invalid header characters".into(),
        })?;
    value.set_sensitive(true);
    Ok(value)
}
