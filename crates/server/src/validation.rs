// Input validation helpers.
//
// - `ValidatedJson<T>` extractor: content-type check + serde + size enforcement.
// - WebSocket frame size limit constant.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::{ErrorCode, ServerError};

/// Maximum WebSocket frame payload in bytes (64 KiB — interaction payloads
/// are small; anything larger is a broken client).
pub const MAX_WS_FRAME_BYTES: usize = 64 * 1024;

/// Maximum REST request body in bytes (256 KiB).
/// Matches `MAX_REQUEST_BODY_BYTES` in main.rs — canonical source for validators.
pub const MAX_REST_BODY_BYTES: usize = 256 * 1024;

/// A JSON body extractor that returns a structured `ServerError` on failure.
///
/// Use this instead of `axum::Json<T>` in handlers to get consistent
/// VALIDATION_FAILED error responses instead of plain-text Axum rejections.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                let (message, details) = classify_json_rejection(&rejection);
                Err(ServerError::new(ErrorCode::ValidationFailed, message)
                    .with_details(details)
                    .into_response())
            }
        }
    }
}

/// Classify a JSON rejection into a human-readable message and details object.
fn classify_json_rejection(rejection: &JsonRejection) -> (String, serde_json::Value) {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            (format!("invalid JSON payload: {e}"), serde_json::json!({ "kind": "data_error" }))
        }
        JsonRejection::JsonSyntaxError(e) => {
            (format!("malformed JSON: {e}"), serde_json::json!({ "kind": "syntax_error" }))
        }
        JsonRejection::MissingJsonContentType(_) => (
            "expected Content-Type: application/json".to_string(),
            serde_json::json!({ "kind": "missing_content_type" }),
        ),
        JsonRejection::BytesRejection(e) => {
            (format!("request body error: {e}"), serde_json::json!({ "kind": "body_error" }))
        }
        other => {
            (format!("request body error: {other}"), serde_json::json!({ "kind": "unknown" }))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        routing::post,
        Router,
    };
    use serde::Deserialize;
    use tower::ServiceExt;

    use super::ValidatedJson;

    #[derive(Deserialize)]
    struct EchoBody {
        message: String,
    }

    fn echo_app() -> Router {
        Router::new().route(
            "/echo",
            post(|ValidatedJson(body): ValidatedJson<EchoBody>| async move { body.message }),
        )
    }

    #[tokio::test]
    async fn valid_json_passes_through() {
        let response = echo_app()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"message":"hi"}"#))
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_json_yields_validation_failed_envelope() {
        let response = echo_app()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"message":"#))
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let parsed: serde_json::Value =
            serde_json::from_slice(&body).expect("body should be json");
        assert_eq!(parsed["error"]["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn missing_content_type_is_rejected() {
        let response = echo_app()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .body(Body::from(r#"{"message":"hi"}"#))
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
