use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use headers::{authorization::Bearer, Authorization, HeaderMapExt};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::jwt::validate_token;

/// Anything the auth middleware can pull a JWT secret out of.
pub trait JwtSecretSource {
    fn jwt_secret(&self) -> &str;
}

impl JwtSecretSource for AppConfig {
    fn jwt_secret(&self) -> &str {
        &self.supabase_jwt_secret
    }
}

pub async fn auth_middleware<S>(
    State(state): State<Arc<S>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError>
where
    S: JwtSecretSource + Send + Sync + 'static,
{
    let token = bearer_token(&request)?;

    let user = validate_token(&token, state.jwt_secret())
        .map_err(AppError::Auth)?;

    debug!("Authenticated user {}", user.id);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn bearer_token(request: &Request<Body>) -> Result<String, AppError> {
    if !request.headers().contains_key(AUTHORIZATION) {
        return Err(AppError::Auth("Missing authorization header".to_string()));
    }

    request
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .map(|Authorization(bearer)| bearer.token().to_string())
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request_with(header: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn extracts_bearer_token() {
        let request = request_with(Some("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&request).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn rejects_missing_and_non_bearer_headers() {
        assert_matches!(
            bearer_token(&request_with(None)),
            Err(AppError::Auth(msg)) if msg.contains("Missing")
        );
        assert_matches!(
            bearer_token(&request_with(Some("Basic dXNlcjpwYXNz"))),
            Err(AppError::Auth(msg)) if msg.contains("format")
        );
    }
}
