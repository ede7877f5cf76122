//! Detection endpoint: multipart request, response parsing, timeout.

use async_trait::async_trait;
use reqwest::{
    Client, StatusCode,
    header::REFERER,
    multipart::{Form, Part},
};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use super::csrf::{CSRF_HEADER, CsrfSource};
use crate::{
    config::{ServerCfg, join_url},
    submission::{DetectionReport, SubmissionRequest},
};

/// Reason shown when the server gave us nothing better.
pub const NETWORK_FAILURE: &str = "Network error. Please try again.";

/// Ways a dispatched submission can fail.
#[derive(Clone, Debug, Error)]
pub enum DetectError {
    /// Connection refused, reset, DNS failure, body read failure.
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx status, with the server's `error` text when it sent one.
    #[error("server error ({status}): {}", .message.as_deref().unwrap_or("no details"))]
    Server { status: u16, message: Option<String> },

    /// 2xx but the body is not a detection result.
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("anti-forgery token unavailable: {0}")]
    Csrf(String),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    Request(String),
}

impl DetectError {
    /// Text for the failure notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::Server {
                message: Some(m), ..
            } => m.clone(),
            Self::Server {
                status,
                message: None,
            } => format!("Upload failed (HTTP {status})"),
            _ => NETWORK_FAILURE.to_string(),
        }
    }
}

/// Seam for the network call so the controller can run headless.
#[async_trait]
pub trait DetectionClient: Send + Sync {
    async fn detect(&self, request: &SubmissionRequest) -> Result<DetectionReport, DetectError>;
}

/// Multipart field names for the image parts and their view types.
#[derive(Clone, Debug)]
pub struct FieldNames {
    pub image: String,
    pub view: String,
}

/// reqwest-backed client for the detection site.
pub struct HttpDetectionClient {
    http: Client,
    endpoint: String,
    referer: String,
    csrf: CsrfSource,
    fields: FieldNames,
}

impl HttpDetectionClient {
    /// Build from `[server]` settings. The cookie jar keeps the session and
    /// csrf cookies the form page sets.
    pub fn from_config(server: &ServerCfg) -> Result<Self, DetectError> {
        reqwest::Url::parse(&server.base_url)
            .map_err(|e| DetectError::Request(format!("invalid base_url {}: {e}", server.base_url)))?;

        let http = Client::builder()
            .cookie_store(true)
            .user_agent(concat!("photocheck_tui/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DetectError::Request(e.to_string()))?;

        let form_url = join_url(&server.base_url, &server.form_path);
        let csrf = if server.csrf_token.trim().is_empty() {
            CsrfSource::from_page(form_url.clone())
        } else {
            CsrfSource::fixed(server.csrf_token.trim())
        };

        Ok(Self {
            http,
            endpoint: join_url(&server.base_url, &server.detect_path),
            referer: form_url,
            csrf,
            fields: FieldNames {
                image: server.image_field.clone(),
                view: server.view_field.clone(),
            },
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DetectionClient for HttpDetectionClient {
    async fn detect(&self, request: &SubmissionRequest) -> Result<DetectionReport, DetectError> {
        let token = self.csrf.token(&self.http).await?;
        let form = build_form(request, &self.fields)?;

        tracing::info!(
            "POST {} ({} images, brand {:?})",
            self.endpoint,
            request.images().len(),
            request.brand_name()
        );
        let resp = self
            .http
            .post(&self.endpoint)
            .header(CSRF_HEADER, token)
            .header(REFERER, &self.referer)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DetectError::Network(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::FORBIDDEN {
            self.csrf.invalidate().await;
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| DetectError::Network(e.to_string()))?;
        parse_response(status, &body)
    }
}

/// `brand_name`, then one image part followed by its view type per slot.
pub fn build_form(request: &SubmissionRequest, fields: &FieldNames) -> Result<Form, DetectError> {
    let mut form = Form::new().text("brand_name", request.brand_name().to_string());
    for (slot, file) in request.images() {
        let part = Part::bytes(file.bytes().to_vec())
            .file_name(file.file_name.clone())
            .mime_str(&file.media_type)
            .map_err(|e| DetectError::Request(format!("{slot}: {e}")))?;
        form = form
            .part(fields.image.clone(), part)
            .text(fields.view.clone(), slot.clone());
    }
    Ok(form)
}

/// Success body.
#[derive(Debug, Deserialize)]
struct DetectResp {
    is_fake: bool,
    confidence: f64,
    message: String,
    processing_time: f64,
}

/// Error body; `detail` is what DRF sends for auth/permission failures.
#[derive(Debug, Deserialize)]
struct ErrorResp {
    error: Option<String>,
    detail: Option<String>,
}

/// Map a status and raw body to a report or an error.
pub fn parse_response(status: StatusCode, body: &[u8]) -> Result<DetectionReport, DetectError> {
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorResp>(body)
            .ok()
            .and_then(|e| e.error.or(e.detail))
            .filter(|m| !m.trim().is_empty());
        return Err(DetectError::Server {
            status: status.as_u16(),
            message,
        });
    }

    let r: DetectResp =
        serde_json::from_slice(body).map_err(|e| DetectError::Malformed(e.to_string()))?;
    if !(0.0..=1.0).contains(&r.confidence) {
        return Err(DetectError::Malformed(format!(
            "confidence out of range: {}",
            r.confidence
        )));
    }
    if r.processing_time < 0.0 {
        return Err(DetectError::Malformed(format!(
            "negative processing time: {}",
            r.processing_time
        )));
    }
    Ok(DetectionReport {
        is_fake: r.is_fake,
        confidence: r.confidence,
        message: r.message,
        processing_time_secs: r.processing_time,
    })
}

/// Run one detection call, bounded by `timeout`.
pub async fn dispatch<C>(
    client: &C,
    request: &SubmissionRequest,
    timeout: Duration,
) -> Result<DetectionReport, DetectError>
where
    C: DetectionClient + ?Sized,
{
    match tokio::time::timeout(timeout, client.detect(request)).await {
        Ok(result) => result,
        Err(_) => Err(DetectError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        slots::tests::{front_back_side, png},
        submission::SubmissionController,
    };
    use axum::{
        Json, Router,
        extract::{Multipart, State},
        http::{HeaderMap, StatusCode as AxumStatus},
        response::Html,
        routing::{get, post},
    };
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<String>>>;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Records the csrf header and every multipart field in arrival order.
    async fn record_detect(
        State(seen): State<Seen>,
        headers: HeaderMap,
        mut multipart: Multipart,
    ) -> Json<Value> {
        let token = headers
            .get("x-csrftoken")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        seen.lock().unwrap().push(format!("csrf={token}"));
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or("").to_string();
            let entry = match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let ct = field.content_type().unwrap_or("").to_string();
                    let len = field.bytes().await.unwrap().len();
                    format!("{name}:{file_name}:{ct}:{len}")
                }
                None => format!("{name}={}", field.text().await.unwrap()),
            };
            seen.lock().unwrap().push(entry);
        }
        Json(json!({
            "is_fake": false,
            "confidence": 0.87,
            "message": "Looks authentic",
            "processing_time": 1.23
        }))
    }

    fn server_cfg(base_url: &str, csrf_token: &str) -> ServerCfg {
        let mut cfg = Config::default().server;
        cfg.base_url = base_url.to_string();
        cfg.csrf_token = csrf_token.to_string();
        cfg
    }

    #[tokio::test]
    async fn test_request_carries_brand_images_and_views_in_slot_order() {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/",
                get(|| async {
                    Html(r#"<form><input type="hidden" name="csrfmiddlewaretoken" value="page-token"></form>"#)
                }),
            )
            .route("/detect/", post(record_detect))
            .with_state(seen.clone());
        let base = serve(app).await;
        let client = HttpDetectionClient::from_config(&server_cfg(&base, "")).unwrap();

        let mut reg = front_back_side();
        reg.set_file("back", png("b.png", 5)).unwrap();
        reg.set_file("front", png("f.png", 3)).unwrap();
        let mut ctl = SubmissionController::new(1024, 2);

        let outcome = ctl
            .submit("  Nike ", &reg, &client, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            [
                "csrf=page-token",
                "brand_name=Nike",
                "images:f.png:image/png:3",
                "view_types=front",
                "images:b.png:image/png:5",
                "view_types=back",
            ]
        );
        let report = outcome.report().unwrap();
        assert_eq!(report.confidence, 0.87);
        assert!(!report.is_fake);
    }

    #[tokio::test]
    async fn test_server_error_message_is_surfaced() {
        let app = Router::new().route(
            "/detect/",
            post(|| async {
                (
                    AxumStatus::BAD_REQUEST,
                    Json(json!({"error": "Brand name is required"})),
                )
            }),
        );
        let base = serve(app).await;
        let client = HttpDetectionClient::from_config(&server_cfg(&base, "fixed")).unwrap();

        let mut reg = front_back_side();
        reg.set_file("front", png("f.png", 1)).unwrap();
        reg.set_file("back", png("b.png", 1)).unwrap();
        let mut ctl = SubmissionController::new(1024, 2);

        let outcome = ctl
            .submit("Nike", &reg, &client, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.failure_reason(), Some("Brand name is required"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_a_network_error() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let client = HttpDetectionClient::from_config(&server_cfg(
            &format!("http://127.0.0.1:{port}"),
            "fixed",
        ))
        .unwrap();

        let mut reg = front_back_side();
        reg.set_file("front", png("f.png", 1)).unwrap();
        reg.set_file("back", png("b.png", 1)).unwrap();
        let mut ctl = SubmissionController::new(1024, 2);
        let (ticket, request) = ctl.begin("Nike", &reg).unwrap().unwrap();

        let err = dispatch(&client, &request, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectError::Network(_)), "{err:?}");

        let outcome = ctl.complete(ticket, Err(err)).unwrap();
        assert_eq!(outcome.failure_reason(), Some(NETWORK_FAILURE));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let res = HttpDetectionClient::from_config(&server_cfg("not a url", ""));
        assert!(matches!(res, Err(DetectError::Request(_))));
    }

    #[test]
    fn test_endpoint_joins_base_and_path() {
        let client =
            HttpDetectionClient::from_config(&server_cfg("http://127.0.0.1:8000/", "")).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:8000/detect/");
    }

    #[test]
    fn test_parses_success_body() {
        let body = br#"{"is_fake": true, "confidence": 0.42, "message": "Suspicious print", "processing_time": 0.5}"#;
        let report = parse_response(StatusCode::OK, body).unwrap();
        assert!(report.is_fake);
        assert_eq!(report.confidence, 0.42);
        assert_eq!(report.message, "Suspicious print");
        assert_eq!(report.processing_time_secs, 0.5);
    }

    #[test]
    fn test_error_status_without_body_is_generic() {
        let err = parse_response(StatusCode::INTERNAL_SERVER_ERROR, b"<html>oops</html>").unwrap_err();
        assert!(matches!(
            err,
            DetectError::Server {
                status: 500,
                message: None
            }
        ));
        assert_eq!(err.user_message(), "Upload failed (HTTP 500)");
    }

    #[test]
    fn test_detail_field_is_used_when_error_missing() {
        let err = parse_response(
            StatusCode::FORBIDDEN,
            br#"{"detail": "CSRF Failed: CSRF token missing."}"#,
        )
        .unwrap_err();
        assert_eq!(err.user_message(), "CSRF Failed: CSRF token missing.");
    }

    #[test]
    fn test_malformed_success_body_is_rejected() {
        let err = parse_response(StatusCode::OK, br#"{"status": "ok"}"#).unwrap_err();
        assert!(matches!(err, DetectError::Malformed(_)));
        assert_eq!(err.user_message(), NETWORK_FAILURE);

        let err = parse_response(
            StatusCode::OK,
            br#"{"is_fake": false, "confidence": 1.5, "message": "", "processing_time": 1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DetectError::Malformed(_)));
    }

    struct Hangs;

    #[async_trait]
    impl DetectionClient for Hangs {
        async fn detect(&self, _request: &SubmissionRequest) -> Result<DetectionReport, DetectError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(DetectError::Network("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_times_out() {
        let mut reg = front_back_side();
        reg.set_file("front", png("f.png", 1)).unwrap();
        reg.set_file("back", png("b.png", 1)).unwrap();
        let mut ctl = SubmissionController::new(1024, 2);
        let (_, request) = ctl.begin("Nike", &reg).unwrap().unwrap();

        let err = dispatch(&Hangs, &request, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectError::Timeout(_)));
    }
}
