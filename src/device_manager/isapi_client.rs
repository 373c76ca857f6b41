// isapi_client.rs
// Plate-read queries against cameras speaking the ISAPI traffic protocol

use crate::device_manager::DeviceClient;
use crate::error::Error;
use crate::utils::time_codec::TimeCodec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use digest_auth::AuthContext;
use log::debug;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use url::Url;
use yaserde_derive::{YaDeserialize, YaSerialize};

pub const PLATES_PATH: &str = "ISAPI/Traffic/channels/1/vehicleDetect/plates";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request body asking the device for every plate read after `picTime`
#[derive(Debug, YaSerialize, YaDeserialize, Default)]
#[yaserde(rename = "AfterTime")]
pub struct AfterTime {
    #[yaserde(rename = "picTime")]
    pub pic_time: String,
}

impl AfterTime {
    pub fn new(watermark: DateTime<Utc>, codec: &TimeCodec) -> Self {
        Self {
            pic_time: codec.to_device_local(watermark),
        }
    }

    pub fn to_xml(&self) -> Result<String, Error> {
        yaserde::ser::to_string(self)
            .map_err(|e| Error::Internal(format!("Failed to encode AfterTime: {}", e)))
    }
}

/// Builder for IsapiClient configuration
pub struct IsapiClientBuilder {
    uri: Option<Url>,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
    codec: Option<TimeCodec>,
}

impl Default for IsapiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IsapiClientBuilder {
    pub fn new() -> Self {
        Self {
            uri: None,
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            codec: None,
        }
    }

    /// Set the camera's base URI (e.g., "http://192.168.1.64")
    pub fn uri(mut self, uri: &str) -> Result<Self, Error> {
        let base = uri.trim_end_matches('/');
        let full = Url::parse(&format!("{}/{}", base, PLATES_PATH))
            .map_err(|e| Error::Config(format!("Invalid camera URI '{}': {}", uri, e)))?;
        self.uri = Some(full);
        Ok(self)
    }

    /// Set the username and password for digest authentication
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Upper bound for a single request, including the auth round trip
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn time_codec(mut self, codec: TimeCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn build(self) -> Result<IsapiClient, Error> {
        let uri = self
            .uri
            .ok_or_else(|| Error::Config("URI must be specified.".to_string()))?;
        let codec = self
            .codec
            .ok_or_else(|| Error::Config("Time codec must be specified.".to_string()))?;

        let (username, password) = match (self.username, self.password) {
            (Some(username), Some(password)) => (username, password),
            _ => {
                return Err(Error::Config(
                    "Username and password must be specified together".to_string(),
                ))
            }
        };

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(IsapiClient {
            http,
            uri,
            username,
            password,
            codec,
        })
    }
}

/// Digest-authenticated client for one camera's plate endpoint.
///
/// No nonce is cached: every call answers a fresh challenge.
pub struct IsapiClient {
    http: reqwest::Client,
    uri: Url,
    username: String,
    password: String,
    codec: TimeCodec,
}

impl IsapiClient {
    pub fn builder() -> IsapiClientBuilder {
        IsapiClientBuilder::new()
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    async fn post(&self, body: &str, authorization: Option<String>) -> Result<Response, Error> {
        let mut request = self
            .http
            .post(self.uri.clone())
            .header(CONTENT_TYPE, "application/xml")
            .body(body.to_string());
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::DeviceUnreachable(format!("{} timed out: {}", self.uri, e))
            } else {
                Error::DeviceUnreachable(format!("{}: {}", self.uri, e))
            }
        })
    }

    /// Answer the `WWW-Authenticate` digest challenge carried by a 401
    fn answer_challenge(&self, response: &Response, body: &str) -> Result<String, Error> {
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::DeviceProtocol {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                message: "401 without a WWW-Authenticate challenge".to_string(),
            })?;

        let mut prompt = digest_auth::parse(challenge).map_err(|e| Error::DeviceProtocol {
            status: StatusCode::UNAUTHORIZED.as_u16(),
            message: format!("Unsupported auth challenge '{}': {}", challenge, e),
        })?;

        let context = AuthContext::new_post(
            self.username.as_str(),
            self.password.as_str(),
            self.uri.path(),
            Some(body.as_bytes()),
        );

        prompt
            .respond(&context)
            .map(|answer| answer.to_header_string())
            .map_err(|e| Error::DeviceProtocol {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                message: format!("Failed to answer digest challenge: {}", e),
            })
    }
}

#[async_trait]
impl DeviceClient for IsapiClient {
    async fn fetch_events_since(&self, watermark: DateTime<Utc>) -> Result<String, Error> {
        let body = AfterTime::new(watermark, &self.codec).to_xml()?;
        debug!("POST {} picTime={}", self.uri, self.codec.to_device_local(watermark));

        let mut response = self.post(&body, None).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let authorization = self.answer_challenge(&response, &body)?;
            response = self.post(&body, Some(authorization)).await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Error::DeviceProtocol {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| Error::DeviceUnreachable(format!("{}: failed to read body: {}", self.uri, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, StatusCode as AxumStatus};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::post;
    use axum::Router;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    const CHALLENGE: &str = r#"Digest realm="IP Camera", qop="auth", nonce="4e6a41314d6a4d3d", opaque="5ccc069c403ebaf9""#;
    const PLATES: &str = "<Plates><Plate><captureTime>20240115T091530</captureTime>\
        <plateNumber>ABC123</plateNumber><picName>pic-1</picName><country>JP</country>\
        <direction>forward</direction></Plate></Plates>";

    #[derive(Debug, Clone)]
    struct SeenRequest {
        authorization: Option<String>,
        body: String,
    }

    fn codec() -> TimeCodec {
        TimeCodec::new(chrono_tz::Asia::Tokyo)
    }

    async fn spawn_device(app: Router) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::Server::from_tcp(listener)
                .unwrap()
                .serve(app.into_make_service())
                .await
                .unwrap();
        });
        format!("http://{}", addr)
    }

    /// Fake camera that demands digest auth and then returns `PLATES`
    fn digest_device(seen: Arc<Mutex<Vec<SeenRequest>>>) -> Router {
        Router::new().route(
            &format!("/{}", PLATES_PATH),
            post(move |headers: HeaderMap, body: String| {
                let seen = seen.clone();
                async move {
                    let authorization = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    seen.lock().unwrap().push(SeenRequest {
                        authorization: authorization.clone(),
                        body,
                    });

                    match authorization {
                        Some(auth) if auth.starts_with("Digest ") => {
                            (AxumStatus::OK, PLATES.to_string()).into_response()
                        }
                        _ => {
                            let mut response: AxumResponse = AxumStatus::UNAUTHORIZED.into_response();
                            response
                                .headers_mut()
                                .insert("www-authenticate", HeaderValue::from_static(CHALLENGE));
                            response
                        }
                    }
                }
            }),
        )
    }

    fn client(base: &str, timeout: Duration) -> IsapiClient {
        IsapiClient::builder()
            .uri(base)
            .unwrap()
            .credentials("admin", "secret")
            .timeout(timeout)
            .time_codec(codec())
            .build()
            .unwrap()
    }

    #[test]
    fn after_time_body_is_bare_local_timestamp() {
        let watermark = Utc.with_ymd_and_hms(2024, 1, 15, 0, 15, 30).unwrap();
        let xml = AfterTime::new(watermark, &codec()).to_xml().unwrap();
        assert!(xml.contains("<AfterTime>"));
        assert!(xml.contains("<picTime>2024-01-15T09:15:30</picTime>"));
    }

    #[test]
    fn builder_requires_credentials_and_valid_uri() {
        assert!(IsapiClient::builder().uri("not a url").is_err());
        let missing_creds = IsapiClient::builder()
            .uri("http://192.168.1.64/")
            .unwrap()
            .time_codec(codec())
            .build();
        assert!(matches!(missing_creds, Err(Error::Config(_))));

        let client = client("http://192.168.1.64/", DEFAULT_TIMEOUT);
        assert_eq!(
            client.uri().as_str(),
            "http://192.168.1.64/ISAPI/Traffic/channels/1/vehicleDetect/plates"
        );
    }

    #[tokio::test]
    async fn answers_digest_challenge_on_every_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let base = spawn_device(digest_device(seen.clone())).await;
        let client = client(&base, Duration::from_secs(5));
        let watermark = Utc.with_ymd_and_hms(2024, 1, 15, 0, 15, 30).unwrap();

        let body = client.fetch_events_since(watermark).await.unwrap();
        assert_eq!(body, PLATES);
        client.fetch_events_since(watermark).await.unwrap();

        let seen = seen.lock().unwrap();
        // challenge + answer, twice
        assert_eq!(seen.len(), 4);
        assert!(seen[0].authorization.is_none());
        assert!(seen[2].authorization.is_none());

        let answer = seen[1].authorization.as_deref().unwrap();
        assert!(answer.contains(r#"username="admin""#));
        assert!(answer.contains(&format!(r#"uri="/{}""#, PLATES_PATH)));
        assert!(answer.contains("response="));
        assert!(seen[1].body.contains("<picTime>2024-01-15T09:15:30</picTime>"));
    }

    #[tokio::test]
    async fn non_success_status_is_protocol_error() {
        let app = Router::new().route(
            &format!("/{}", PLATES_PATH),
            post(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "<Plates></Plates>") }),
        );
        let base = spawn_device(app).await;

        let result = client(&base, Duration::from_secs(5))
            .fetch_events_since(Utc::now())
            .await;
        assert!(matches!(result, Err(Error::DeviceProtocol { status: 503, .. })));
    }

    #[tokio::test]
    async fn rejected_credentials_are_protocol_error() {
        let app = Router::new().route(
            &format!("/{}", PLATES_PATH),
            post(|| async {
                let mut response: AxumResponse = AxumStatus::UNAUTHORIZED.into_response();
                response
                    .headers_mut()
                    .insert("www-authenticate", HeaderValue::from_static(CHALLENGE));
                response
            }),
        );
        let base = spawn_device(app).await;

        let result = client(&base, Duration::from_secs(5))
            .fetch_events_since(Utc::now())
            .await;
        assert!(matches!(result, Err(Error::DeviceProtocol { status: 401, .. })));
    }

    #[tokio::test]
    async fn slow_device_is_unreachable() {
        let app = Router::new().route(
            &format!("/{}", PLATES_PATH),
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                "<Plates></Plates>"
            }),
        );
        let base = spawn_device(app).await;

        let result = client(&base, Duration::from_millis(200))
            .fetch_events_since(Utc::now())
            .await;
        assert!(matches!(result, Err(Error::DeviceUnreachable(_))));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = client(&format!("http://{}", addr), Duration::from_secs(2))
            .fetch_events_since(Utc::now())
            .await;
        assert!(matches!(result, Err(Error::DeviceUnreachable(_))));
    }
}
