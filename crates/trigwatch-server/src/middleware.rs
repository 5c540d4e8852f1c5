use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use trigwatch_storage::OpContext;

use crate::state::AppState;

/// Header naming the user a change is attributed to.
pub const AUTH_USER_HEADER: &str = "x-auth-user";

/// Value of the `X-Auth-User` header, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthUser(pub Option<String>);

/// Places the request deadline ([`OpContext`]) and the [`AuthUser`] into the
/// request extensions. Store calls, lock acquisitions and metric fetches made
/// for the request stop at that deadline.
pub async fn request_context(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = OpContext::with_timeout(state.config.api.request_timeout());
    let user = req
        .headers()
        .get(AUTH_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    req.extensions_mut().insert(ctx);
    req.extensions_mut().insert(AuthUser(user));
    next.run(req).await
}
