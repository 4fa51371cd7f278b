use crate::{
    auth::jwt::{ActorRole, JwtAccessTokenService, WebinarAccess},
    error::{ErrorCode, ServerError},
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// The authenticated registrant injected into request extensions after a
/// successful bearer-token validation. Writes to the Event Store only happen
/// behind this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedRegistrant {
    pub registration_id: uuid::Uuid,
    pub webinar_id: uuid::Uuid,
    pub role: ActorRole,
}

pub async fn require_bearer_auth(
    State(jwt_service): State<Arc<JwtAccessTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        Some(token) => token,
        None => return unauthorized_response("missing bearer token"),
    };

    let WebinarAccess { registration_id, webinar_id, role } =
        match jwt_service.validate_webinar_token(token) {
            Ok(claims) => claims,
            Err(_) => return unauthorized_response("invalid bearer token"),
        };

    request.extensions_mut().insert(AuthenticatedRegistrant {
        registration_id,
        webinar_id,
        role,
    });

    next.run(request).await
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    ServerError::new(ErrorCode::AuthInvalidToken, message).into_response()
}
