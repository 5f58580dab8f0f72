//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "HTTP RPC client for Indevolt devices."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The device exposes a single RPC verb over plain HTTP:
//!
//! ```text
//! POST http://{host}:{port}/rpc/Indevolt.GetData?config={"t":["1664","6002"]}
//! ```
//!
//! and answers with a flat JSON object keyed by register.

use std::time::Duration;

use async_trait::async_trait;
use indevolt_catalog::{RegisterKey, SERIAL_NUMBER_KEY};
use indevolt_common::config::{DeviceConfig, DEFAULT_PORT, DEFAULT_RPC_METHOD};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::transport::{DeviceTransport, RegisterValues};

/// Connection parameters for a [`DeviceClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Host name or IP address, without scheme.
    pub host: String,
    /// HTTP port.
    pub port: u16,
    /// RPC method appended to `/rpc/`.
    pub rpc_method: String,
    /// Total time allowed for one request, body included.
    pub request_timeout: Duration,
}

impl ClientSettings {
    /// Settings for `host` with default port, method and a 60 second timeout.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            rpc_method: DEFAULT_RPC_METHOD.to_owned(),
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Override the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn endpoint(&self) -> Result<Url, FetchError> {
        let raw = format!("http://{}:{}/rpc/{}", self.host, self.port, self.rpc_method);
        Url::parse(&raw).map_err(|err| FetchError::InvalidEndpoint(format!("{raw}: {err}")))
    }
}

impl From<&DeviceConfig> for ClientSettings {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            rpc_method: config.rpc_method.clone(),
            request_timeout: config.request_timeout,
        }
    }
}

/// reqwest-backed transport talking to one device.
#[derive(Debug)]
pub struct DeviceClient {
    settings: ClientSettings,
    endpoint: Url,
    http: Mutex<Option<reqwest::Client>>,
}

impl DeviceClient {
    /// Build a client. No request is made until the first fetch.
    pub fn new(settings: ClientSettings) -> Result<Self, FetchError> {
        let endpoint = settings.endpoint()?;
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| FetchError::Network(err.to_string()))?;
        Ok(Self {
            settings,
            endpoint,
            http: Mutex::new(Some(http)),
        })
    }

    /// Build a client from a device configuration entry.
    pub fn from_config(config: &DeviceConfig) -> Result<Self, FetchError> {
        Self::new(ClientSettings::from(config))
    }

    /// RPC endpoint without the query string.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Settings the client was built with.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Whether [`DeviceTransport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.http.lock().is_none()
    }

    /// Read the serial number register. Devices report it either as a string
    /// or as a bare number; both come back as text.
    pub async fn probe_serial(&self) -> Result<Option<String>, FetchError> {
        let values = self.fetch(&[RegisterKey::serial_number()]).await?;
        Ok(values.get(SERIAL_NUMBER_KEY).and_then(|value| match value {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }))
    }

    /// Full request URL for `keys`, with the compact `{"t":[...]}` payload.
    pub fn request_url(&self, keys: &[RegisterKey]) -> Url {
        let payload = json!({ "t": keys.iter().map(RegisterKey::as_str).collect::<Vec<_>>() });
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("config", &payload.to_string());
        url
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.settings.request_timeout)
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl DeviceTransport for DeviceClient {
    async fn fetch(&self, keys: &[RegisterKey]) -> Result<RegisterValues, FetchError> {
        let http = self.http.lock().clone().ok_or(FetchError::Closed)?;
        let url = self.request_url(keys);
        debug!(host = %self.settings.host, keys = keys.len(), "fetching registers");

        let response = http.post(url).send().await.map_err(|err| self.classify(err))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.bytes().await.map_err(|err| self.classify(err))?;
        parse_body(&body)
    }

    async fn close(&self) {
        if self.http.lock().take().is_some() {
            debug!(host = %self.settings.host, "device client closed");
        }
    }
}

fn parse_body(body: &[u8]) -> Result<RegisterValues, FetchError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map
            .into_iter()
            .map(|(key, value)| (RegisterKey::from(key), value))
            .collect()),
        Ok(other) => Err(FetchError::MalformedBody(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
        Err(err) => Err(FetchError::MalformedBody(err.to_string())),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Seen {
        configs: Arc<Mutex<Vec<String>>>,
    }

    async fn spawn_device(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn client_for(addr: SocketAddr, timeout: Duration) -> DeviceClient {
        DeviceClient::new(
            ClientSettings::new("127.0.0.1")
                .with_port(addr.port())
                .with_timeout(timeout),
        )
        .unwrap()
    }

    fn keys(raw: &[&str]) -> Vec<RegisterKey> {
        raw.iter().map(|key| RegisterKey::from(*key)).collect()
    }

    async fn answer(
        State(seen): State<Seen>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        seen.configs
            .lock()
            .push(params.get("config").cloned().unwrap_or_default());
        Json(json!({ "1664": 120, "6002": 87 }))
    }

    #[test]
    fn request_url_encodes_compact_payload() {
        let client = DeviceClient::new(ClientSettings::new("192.168.1.20")).unwrap();
        let url = client.request_url(&keys(&["1664", "6002"]));
        assert_eq!(url.path(), "/rpc/Indevolt.GetData");
        assert_eq!(url.port(), Some(8080));
        let config: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            config,
            vec![("config".to_owned(), r#"{"t":["1664","6002"]}"#.to_owned())]
        );
    }

    #[test]
    fn rejects_unparseable_host() {
        let err = DeviceClient::new(ClientSettings::new("bad host")).unwrap_err();
        assert!(matches!(err, FetchError::InvalidEndpoint(_)));
    }

    #[test]
    fn non_object_bodies_are_malformed() {
        assert!(matches!(
            parse_body(b"[1,2,3]"),
            Err(FetchError::MalformedBody(_))
        ));
        assert!(matches!(
            parse_body(b"not json"),
            Err(FetchError::MalformedBody(_))
        ));
        let values = parse_body(br#"{"7101": 5}"#).unwrap();
        assert_eq!(values.get("7101"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn fetch_posts_keys_in_order() {
        let seen = Seen::default();
        let router = Router::new()
            .route("/rpc/Indevolt.GetData", post(answer))
            .with_state(seen.clone());
        let addr = spawn_device(router).await;
        let client = client_for(addr, Duration::from_secs(5));

        let values = client.fetch(&keys(&["1664", "6002"])).await.unwrap();
        assert_eq!(values.get("1664"), Some(&json!(120)));
        assert_eq!(values.get("6002"), Some(&json!(87)));
        assert_eq!(
            seen.configs.lock().as_slice(),
            [r#"{"t":["1664","6002"]}"#.to_owned()]
        );
    }

    #[tokio::test]
    async fn missing_keys_are_not_an_error() {
        let router = Router::new().route(
            "/rpc/Indevolt.GetData",
            post(|| async { Json(json!({ "1664": 120 })) }),
        );
        let addr = spawn_device(router).await;
        let client = client_for(addr, Duration::from_secs(5));

        let values = client.fetch(&keys(&["1664", "6002"])).await.unwrap();
        assert_eq!(values.len(), 1);
        assert!(values.get("6002").is_none());
    }

    #[tokio::test]
    async fn non_ok_success_status_is_rejected() {
        let router = Router::new().route(
            "/rpc/Indevolt.GetData",
            post(|| async { (StatusCode::ACCEPTED, Json(json!({ "1664": 120 }))) }),
        );
        let addr = spawn_device(router).await;
        let client = client_for(addr, Duration::from_secs(5));

        let err = client.fetch(&keys(&["1664"])).await.unwrap_err();
        assert_eq!(err, FetchError::Status(202));
        assert_eq!(err.kind(), crate::ErrorKind::ProtocolError);
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let router = Router::new().route(
            "/rpc/Indevolt.GetData",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR.into_response() }),
        );
        let addr = spawn_device(router).await;
        let client = client_for(addr, Duration::from_secs(5));

        let err = client.fetch(&keys(&["1664"])).await.unwrap_err();
        assert_eq!(err, FetchError::Status(500));
    }

    #[tokio::test]
    async fn garbage_body_is_protocol_error() {
        let router = Router::new().route(
            "/rpc/Indevolt.GetData",
            post(|| async { "<html>busy</html>" }),
        );
        let addr = spawn_device(router).await;
        let client = client_for(addr, Duration::from_secs(5));

        let err = client.fetch(&keys(&["1664"])).await.unwrap_err();
        assert!(matches!(err, FetchError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn slow_device_times_out() {
        let router = Router::new().route(
            "/rpc/Indevolt.GetData",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({}))
            }),
        );
        let addr = spawn_device(router).await;
        let client = client_for(addr, Duration::from_millis(200));

        let err = client.fetch(&keys(&["1664"])).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout(Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = client_for(
            SocketAddr::from(([127, 0, 0, 1], port)),
            Duration::from_secs(5),
        );

        let err = client.fetch(&keys(&["1664"])).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn closed_client_refuses_fetches() {
        let client = DeviceClient::new(ClientSettings::new("127.0.0.1")).unwrap();
        client.close().await;
        client.close().await;
        assert!(client.is_closed());
        assert_eq!(
            client.fetch(&keys(&["1664"])).await.unwrap_err(),
            FetchError::Closed
        );
    }

    #[tokio::test]
    async fn probe_reads_serial_register() {
        let router = Router::new().route(
            "/rpc/Indevolt.GetData",
            post(|| async { Json(json!({ "0": "BK1600-0042" })) }),
        );
        let addr = spawn_device(router).await;
        let client = client_for(addr, Duration::from_secs(5));

        assert_eq!(
            client.probe_serial().await.unwrap(),
            Some("BK1600-0042".to_owned())
        );
    }
}
