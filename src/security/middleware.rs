use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use super::claims::{UserClaims, UserContext};
use crate::AppState;

/// Resolve the caller's identity from an optional bearer token.
///
/// A valid token injects a [`UserContext`] extension; anything else leaves
/// the request anonymous. The middleware never rejects on its own;
/// endpoints that require authentication check for the extension and
/// return 401 themselves.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let secret = &state.config.security.jwt_secret;
    if secret.is_empty() {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    if let Some(token) = token {
        let key = DecodingKey::from_secret(secret.as_bytes());
        match decode::<UserClaims>(token, &key, &Validation::default()) {
            Ok(token_data) => {
                let claims = token_data.claims;
                let context = UserContext {
                    user_id: claims.sub.clone(),
                    claims,
                };
                request.extensions_mut().insert(context);
            }
            Err(e) => {
                tracing::debug!(name: "auth.token_rejected", error = %e, "Treating request as anonymous");
            }
        }
    }

    next.run(request).await
}
