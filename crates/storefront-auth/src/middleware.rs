//! Authentication middleware for Axum

use axum::{
    extract::{RawPathParams, Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::claims::{TokenClass, UserClaims};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::jwt::{SigningKeys, TokenValidator};
use crate::rbac::RoleAuthorizer;
use crate::store::{SessionStore, bounded};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Path parameters that name the user a route belongs to
const PATH_USER_PARAMS: [&str; 2] = ["user_id", "userId"];

/// Authenticated user information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub role: i32,
}

impl AuthUser {
    pub fn from_claims(claims: &UserClaims) -> Self {
        Self {
            id: claims.id.clone(),
            role: claims.role,
        }
    }

    pub fn claims(&self) -> UserClaims {
        UserClaims {
            id: self.id.clone(),
            role: self.role,
        }
    }
}

/// Shared state for the authentication middlewares
#[derive(Clone)]
pub struct AuthGuard {
    validator: TokenValidator,
    sessions: Arc<dyn SessionStore>,
    store_timeout: Duration,
}

impl AuthGuard {
    pub fn new(validator: TokenValidator, sessions: Arc<dyn SessionStore>, store_timeout: Duration) -> Self {
        Self {
            validator,
            sessions,
            store_timeout,
        }
    }

    pub fn from_config(config: &AuthConfig, sessions: Arc<dyn SessionStore>) -> Result<Self, AuthError> {
        let keys = SigningKeys::from_config(config)?;
        Ok(Self::new(TokenValidator::new(keys), sessions, config.store_timeout()))
    }

    /// Verify an access token and confirm its session is still live
    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.validator.verify_user(TokenClass::Access, token)?;

        let live = bounded(
            self.store_timeout,
            "check access token",
            self.sessions.has_access_token(&claims.id, token),
        )
        .await?;
        if !live {
            debug!(user_id = %claims.id, "Access token has no live session");
            return Err(AuthError::SessionNotFound);
        }

        Ok(AuthUser::from_claims(&claims))
    }
}

/// Extract bearer token from authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::Unauthenticated)?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Malformed)
}

fn header_token<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AuthError> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Unauthenticated)
}

/// Authentication middleware
///
/// Requires a bearer access token whose session still holds it, then adds
/// the [`AuthUser`] to request extensions.
pub async fn auth_middleware(
    State(guard): State<Arc<AuthGuard>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_bearer_token(request.headers())?;
    let user = guard.authenticate(token).await?;

    debug!(user_id = %user.id, role = user.role, "Authenticated user");

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Middleware for service-to-service calls carrying an API key token
pub async fn api_key_middleware(
    State(guard): State<Arc<AuthGuard>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = header_token(request.headers(), API_KEY_HEADER)?;
    guard.validator.verify(TokenClass::ApiKey, token)?;

    Ok(next.run(request).await)
}

/// Middleware for internal admin calls carrying an admin token
pub async fn admin_token_middleware(
    State(guard): State<Arc<AuthGuard>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = header_token(request.headers(), ADMIN_TOKEN_HEADER)?;
    guard.validator.verify(TokenClass::Admin, token)?;

    Ok(next.run(request).await)
}

/// Role requirement attached to a route
#[derive(Debug, Clone)]
pub struct RequiredRoles {
    pub authorizer: Arc<RoleAuthorizer>,
    pub roles: Vec<i32>,
}

impl RequiredRoles {
    pub fn new(authorizer: Arc<RoleAuthorizer>, roles: impl Into<Vec<i32>>) -> Self {
        Self {
            authorizer,
            roles: roles.into(),
        }
    }
}

/// Middleware to require one of a set of roles
///
/// Must run after [`auth_middleware`].
pub async fn require_roles(
    State(required): State<RequiredRoles>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let caller = request.extensions().get::<AuthUser>().map(AuthUser::claims);
    required.authorizer.check(caller.as_ref(), &required.roles)?;

    Ok(next.run(request).await)
}

/// Middleware to restrict a per-user route to that user
///
/// The route must capture `{user_id}` (or `{userId}`); the caller's id
/// has to match it. Must run after [`auth_middleware`].
pub async fn require_path_user(
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let caller = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::Unauthenticated)?;

    let path_user = params
        .iter()
        .find(|(name, _)| PATH_USER_PARAMS.contains(name))
        .map(|(_, value)| value);

    if path_user != Some(caller.id.as_str()) {
        debug!(user_id = %caller.id, path_user = ?path_user, "Caller does not own this route");
        return Err(AuthError::Forbidden);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Extension, Json, Router,
        body::{Body, to_bytes},
        http::StatusCode,
        middleware::{from_fn, from_fn_with_state},
        routing::get,
    };
    use storefront_db::NewSession;
    use tower::ServiceExt;

    use crate::config::RoleConfig;
    use crate::jwt::TokenFactory;
    use crate::jwt::tests::test_pair;
    use crate::rbac::RoleSet;
    use crate::store::MemoryStore;

    async fn me(Extension(user): Extension<AuthUser>) -> Json<AuthUser> {
        Json(user)
    }

    async fn ok() -> &'static str {
        "ok"
    }

    struct Harness {
        factory: TokenFactory,
        store: Arc<MemoryStore>,
        app: Router,
    }

    fn harness() -> Harness {
        let (factory, validator) = test_pair();
        let store = Arc::new(MemoryStore::new());
        let guard = Arc::new(AuthGuard::new(validator, store.clone(), Duration::from_millis(200)));

        let roles = RoleSet::new(vec![
            RoleConfig { id: 0, title: "customer".to_string() },
            RoleConfig { id: 1, title: "admin".to_string() },
        ])
        .unwrap();
        let admins_only = RequiredRoles::new(Arc::new(RoleAuthorizer::new(roles)), [1]);

        let admin_routes = Router::new()
            .route("/admin", get(ok))
            .layer(from_fn_with_state(admins_only, require_roles));
        let owner_routes = Router::new()
            .route("/users/{user_id}", get(ok))
            .route("/orders/{user_id}/{order_id}", get(ok))
            .route_layer(from_fn(require_path_user));
        let user_routes = Router::new()
            .route("/me", get(me))
            .merge(admin_routes)
            .merge(owner_routes)
            .layer(from_fn_with_state(guard.clone(), auth_middleware));
        let service_routes = Router::new()
            .route("/internal", get(ok))
            .layer(from_fn_with_state(guard.clone(), api_key_middleware));
        let ops_routes = Router::new()
            .route("/ops", get(ok))
            .layer(from_fn_with_state(guard, admin_token_middleware));

        Harness {
            factory,
            store,
            app: user_routes.merge(service_routes).merge(ops_routes),
        }
    }

    async fn signed_in(h: &Harness, role: i32) -> String {
        let claims = UserClaims {
            id: "user-1".to_string(),
            role,
        };
        let access = h.factory.issue(TokenClass::Access, Some(&claims)).unwrap();
        h.store
            .create(NewSession {
                user_id: claims.id.clone(),
                access_token: access.clone(),
                refresh_token: "unused".to_string(),
            })
            .await
            .unwrap();
        access
    }

    async fn call(app: &Router, path: &str, header: Option<(&str, String)>) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri(path);
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn bearer(token: &str) -> Option<(&'static str, String)> {
        Some(("authorization", format!("Bearer {}", token)))
    }

    #[tokio::test]
    async fn test_bearer_access_token_reaches_handler() {
        let h = harness();
        let token = signed_in(&h, 0).await;

        let (status, body) = call(&h.app, "/me", bearer(&token)).await;
        assert_eq!(status, StatusCode::OK);
        let user: AuthUser = serde_json::from_str(&body).unwrap();
        assert_eq!(user, AuthUser { id: "user-1".to_string(), role: 0 });
    }

    #[tokio::test]
    async fn test_missing_or_bad_header_is_unauthorized() {
        let h = harness();

        let (status, body) = call(&h.app, "/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, r#"{"error":"unauthorized"}"#);

        let (status, _) = call(&h.app, "/me", Some(("authorization", "Basic abc".to_string()))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&h.app, "/me", bearer("not-a-token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_token_without_session_is_rejected() {
        let h = harness();
        let claims = UserClaims {
            id: "user-1".to_string(),
            role: 0,
        };
        let orphan = h.factory.issue(TokenClass::Access, Some(&claims)).unwrap();

        let (status, _) = call(&h.app, "/me", bearer(&orphan)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_a_bearer_token() {
        let h = harness();
        let claims = UserClaims {
            id: "user-1".to_string(),
            role: 0,
        };
        let refresh = h.factory.issue(TokenClass::Refresh, Some(&claims)).unwrap();

        let (status, _) = call(&h.app, "/me", bearer(&refresh)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_role_gate() {
        let h = harness();

        let customer = signed_in(&h, 0).await;
        let (status, body) = call(&h.app, "/admin", bearer(&customer)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, r#"{"error":"permission denied"}"#);

        let admin = signed_in(&h, 1).await;
        let (status, body) = call(&h.app, "/admin", bearer(&admin)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_path_user_must_match_caller() {
        let h = harness();
        let token = signed_in(&h, 0).await;

        let (status, body) = call(&h.app, "/users/user-1", bearer(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, _) = call(&h.app, "/orders/user-1/order-9", bearer(&token)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&h.app, "/users/user-2", bearer(&token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, r#"{"error":"permission denied"}"#);

        let (status, _) = call(&h.app, "/orders/user-2/order-9", bearer(&token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&h.app, "/users/user-1", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_path_user_without_auth_user_is_unauthenticated() {
        let app = Router::new()
            .route("/users/{userId}", get(ok))
            .route_layer(from_fn(require_path_user));

        let (status, body) = call(&app, "/users/user-1", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, r#"{"error":"unauthorized"}"#);
    }

    #[tokio::test]
    async fn test_api_key_route() {
        let h = harness();
        let key = h.factory.issue(TokenClass::ApiKey, None).unwrap();
        let admin = h.factory.issue(TokenClass::Admin, None).unwrap();

        let (status, _) = call(&h.app, "/internal", Some((API_KEY_HEADER, key))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&h.app, "/internal", Some((API_KEY_HEADER, admin))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&h.app, "/internal", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_token_route() {
        let h = harness();
        let admin = h.factory.issue(TokenClass::Admin, None).unwrap();
        let key = h.factory.issue(TokenClass::ApiKey, None).unwrap();

        let (status, _) = call(&h.app, "/ops", Some((ADMIN_TOKEN_HEADER, admin))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&h.app, "/ops", Some((ADMIN_TOKEN_HEADER, key))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_guard_from_config() {
        let store = Arc::new(MemoryStore::new());
        assert!(AuthGuard::from_config(&crate::jwt::tests::test_config(), store.clone()).is_ok());
        assert!(matches!(
            AuthGuard::from_config(&AuthConfig::default(), store),
            Err(AuthError::Configuration(_))
        ));
    }
}
