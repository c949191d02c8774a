#![warn(
    clippy::correctness,
    clippy::perf,
    clippy::suspicious,
    clippy::complexity
)]
#![forbid(unsafe_code)]

use std::error::Error;
use std::sync::Arc;

use axum::Router;

pub mod clock;
pub mod config;
pub mod error;
mod http;
pub mod redirect;
pub mod store;

use clock::SystemClock;
use config::{Mode, RendezvousConfig};
use http::{native_router, UrlBuilder};
use store::Store;

/// Assembles the top-level [`Router`] for the configured mode (spec §4.5).
/// The legacy redirect, when configured, is mounted independent of `mode`.
pub fn app(config: &RendezvousConfig) -> Router {
    let mut router = match config.mode {
        Mode::Disabled => Router::new(),
        Mode::Delegated => {
            let target = config
                .delegation_url
                .as_deref()
                .expect("validated: delegated mode requires delegation_url");
            redirect::redirect_router(target)
        }
        Mode::Native => {
            let store = Store::new(config.store_config(), Arc::new(SystemClock));
            let url_builder = UrlBuilder::new(config.session_url_prefix.clone());
            native_router(store, url_builder)
        }
    };

    if let Some(legacy_url) = &config.legacy_redirect_url {
        router = router.route(&config.legacy_path, redirect::redirect_handler(legacy_url));
    }

    router
}

pub async fn serve(config: RendezvousConfig) -> Result<(), Box<dyn Error>> {
    config.validate()?;
    let app = app(&config);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:5000")
        .await
        .map_err(|_| "Listening on port 5000 failed. Is this port in use?")?;

    tracing::info!(mode = ?config.mode, "rendezvous service listening on :5000");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn disabled_mode_404s_everything() {
        let config = RendezvousConfig::default();
        let app = app(&config);

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/rendezvous")
            .body(axum::body::Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let legacy_req = axum::http::Request::builder()
            .method("POST")
            .uri("/_legacy/rendezvous")
            .body(axum::body::Body::empty())
            .unwrap();
        let legacy_res = app.oneshot(legacy_req).await.unwrap();
        assert_eq!(legacy_res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn legacy_redirect_is_independent_of_mode() {
        let config = RendezvousConfig {
            legacy_redirect_url: Some("/asd".to_string()),
            ..RendezvousConfig::default()
        };
        let app = app(&config);

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/_legacy/rendezvous")
            .body(axum::body::Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(res.headers().get(axum::http::header::LOCATION).unwrap(), "/asd");
    }

    #[tokio::test]
    async fn delegated_mode_redirects_everything() {
        let config = RendezvousConfig {
            mode: Mode::Delegated,
            delegation_url: Some("https://asd".to_string()),
            ..RendezvousConfig::default()
        };
        let app = app(&config);

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/rendezvous")
            .body(axum::body::Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            res.headers().get(axum::http::header::LOCATION).unwrap(),
            "https://asd"
        );
    }
}
