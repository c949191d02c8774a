//! Component F: the delegation/legacy redirect shim. Never touches the
//! store — it only ever returns a 307 to a configured URL (spec §4.5).

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, MethodRouter},
    Router,
};

/// A router that answers every method on every path it's mounted at with a
/// 307 redirect to `target`.
pub fn redirect_router(target: &str) -> Router {
    Router::new().fallback_service(redirect_handler(target))
}

/// A single route handler that redirects to `target`, for mounting the
/// legacy endpoint at a specific path alongside other routes.
pub fn redirect_handler(target: &str) -> MethodRouter {
    let location = HeaderValue::from_str(target).unwrap_or_else(|_| HeaderValue::from_static("/"));
    any(move || {
        let location = location.clone();
        async move {
            let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
            response.headers_mut().insert(axum::http::header::LOCATION, location);
            response
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn redirects_every_method_to_target() {
        let app = redirect_router("https://asd");

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/anything")
            .body(axum::body::Body::empty())
            .unwrap();

        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(res.headers().get(axum::http::header::LOCATION).unwrap(), "https://asd");
    }

    #[tokio::test]
    async fn redirect_handler_mounts_at_a_specific_path() {
        let app: Router = Router::new().route("/legacy", redirect_handler("/asd"));

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/legacy")
            .body(axum::body::Body::empty())
            .unwrap();

        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(res.headers().get(axum::http::header::LOCATION).unwrap(), "/asd");
    }
}
