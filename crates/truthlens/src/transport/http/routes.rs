//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;

use crate::method::available_methods;
use crate::request::RequestError;
use crate::service::{PredictionService, Upload};

/// Room for the JSON envelope around the base64 image.
const ENVELOPE_ALLOWANCE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct PredictBody {
    pub image: Option<String>,
    pub filename: Option<String>,
    pub method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PredictMultiBody {
    pub image: Option<String>,
    pub filename: Option<String>,
    #[serde(default)]
    pub methods: Vec<String>,
}

type JsonResponse = (StatusCode, Json<serde_json::Value>);

fn error_response(status: StatusCode, message: impl Into<String>) -> JsonResponse {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

fn request_error(e: RequestError) -> JsonResponse {
    let status = match e {
        RequestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    tracing::info!(error = %e, "Rejected prediction request");
    error_response(status, e.to_string())
}

fn json_response<T: serde::Serialize>(value: &T) -> JsonResponse {
    match serde_json::to_value(value) {
        Ok(v) => (StatusCode::OK, Json(v)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to serialize response")
        }
    }
}

async fn health(State(service): State<Arc<PredictionService>>) -> JsonResponse {
    json_response(&service.health())
}

async fn test_connection(State(service): State<Arc<PredictionService>>) -> JsonResponse {
    json_response(&service.test_connection().await)
}

async fn methods() -> JsonResponse {
    json_response(&serde_json::json!({ "methods": available_methods() }))
}

async fn predict(
    State(service): State<Arc<PredictionService>>,
    body: Result<Json<PredictBody>, JsonRejection>,
) -> JsonResponse {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let upload = Upload {
        image: body.image,
        file_name: body.filename,
    };
    match service.predict(&upload, body.method.as_deref()).await {
        Ok(response) => json_response(&response),
        Err(e) => request_error(e),
    }
}

async fn predict_multi(
    State(service): State<Arc<PredictionService>>,
    body: Result<Json<PredictMultiBody>, JsonRejection>,
) -> JsonResponse {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let upload = Upload {
        image: body.image,
        file_name: body.filename,
    };
    match service.predict_multi(&upload, &body.methods).await {
        Ok(response) => json_response(&response),
        Err(e) => request_error(e),
    }
}

pub fn routes(service: Arc<PredictionService>) -> Router {
    let body_limit = service.max_upload_bytes() / 3 * 4 + ENVELOPE_ALLOWANCE;
    Router::new()
        .route("/api/health", get(health))
        .route("/api/test-connection", get(test_connection))
        .route("/api/methods", get(methods))
        .route("/api/predict", post(predict))
        .route("/api/predict-multi", post(predict_multi))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::config::DispatchConfig;

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn app(dir: &std::path::Path) -> Router {
        let config = DispatchConfig::default()
            .with_scratch_dir(dir)
            .with_synthetic_delay(Duration::ZERO);
        routes(Arc::new(PredictionService::new(&config)))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn image_b64() -> String {
        base64::engine::general_purpose::STANDARD.encode(b"\x89PNG\r\n\x1a\nfake")
    }

    #[tokio::test]
    async fn health_lists_strategies() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["version"]["truthlens"].is_string());
        assert_eq!(json["strategies"], serde_json::json!(["synthetic"]));
    }

    #[tokio::test]
    async fn methods_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(Request::get("/api/methods").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = response_json(response).await;
        let methods = json["methods"].as_array().unwrap();
        assert_eq!(methods.len(), 7);
        assert_eq!(methods[0]["value"], "hog_rf");
        assert_eq!(methods[0]["label"], "HOG + Random Forest");
    }

    #[tokio::test]
    async fn test_connection_reports_no_backends() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(
                Request::get("/api/test-connection")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let json = response_json(response).await;
        assert_eq!(json["http_api"]["configured"], false);
        assert_eq!(json["remote_script"]["configured"], false);
        assert_eq!(json["preferred"], "synthetic");
    }

    #[tokio::test]
    async fn predict_returns_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(post_json(
                "/api/predict",
                serde_json::json!({ "image": image_b64(), "filename": "face.png" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["filename"], "face.png");
        let label = json["prediction"]["prediction"].as_str().unwrap();
        assert!(label == "truth" || label == "lie");
        assert!(json["prediction"]["note"].as_str().unwrap().starts_with("synthetic"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn predict_multi_returns_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(post_json(
                "/api/predict-multi",
                serde_json::json!({
                    "image": image_b64(),
                    "filename": "face.png",
                    "methods": ["resnet_dt", "hog_rf", "dlib_dt"]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        let methods: Vec<&str> = json["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["method"].as_str().unwrap())
            .collect();
        assert_eq!(methods, ["resnet_dt", "hog_rf", "dlib_dt"]);
        assert_eq!(json["consensus"]["considered"], 3);
    }

    #[tokio::test]
    async fn unknown_method_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(post_json(
                "/api/predict-multi",
                serde_json::json!({ "image": image_b64(), "methods": ["dlib_rf", "sift_svm"] }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"], "unknown method id: \"sift_svm\"");
    }

    #[tokio::test]
    async fn missing_image_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(post_json(
                "/api/predict",
                serde_json::json!({ "filename": "face.png" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"], "no image provided");
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(
                Request::post("/api/predict")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response_json(response).await["error"].is_string());
    }
}
