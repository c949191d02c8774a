//! Component D: translates HTTP verbs + conditional headers into store
//! operations and formats responses (spec §4.4).

mod date;
pub mod url;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, CACHE_CONTROL, CONTENT_TYPE,
            ETAG, EXPIRES, IF_MATCH, IF_NONE_MATCH, PRAGMA,
        },
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::error::RendezvousError;
use crate::store::{GetOutcome, SessionId, Store};

pub use self::url::UrlBuilder;

#[derive(Clone)]
struct NativeState {
    store: Arc<Store>,
    url_builder: UrlBuilder,
}

/// Mounts the native-mode CRUD endpoint (spec §4.4) behind a layer that
/// stamps every response — success or error — with the CORS/cache-control
/// contract from spec §6, so no handler branch can forget it.
pub fn native_router(store: Arc<Store>, url_builder: UrlBuilder) -> Router {
    let state = NativeState { store, url_builder };

    Router::new()
        .route("/rendezvous", post(create_session))
        .route(
            "/session/:id",
            get(get_session).put(put_session).delete(delete_session),
        )
        .with_state(state)
        .layer(middleware::map_response(attach_common_headers))
}

async fn attach_common_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("etag"));
    response
}

/// Strong ETags are quoted on the wire; comparisons always happen on the
/// unquoted token (spec §4.3, §9 "ETag opacity").
fn quote_etag(tag: &str) -> String {
    format!("\"{tag}\"")
}

fn unquote_etag(header_value: &str) -> String {
    header_value.trim().trim_matches('"').to_string()
}

fn header_str(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

#[derive(Debug, Serialize)]
struct CreateResponseBody {
    url: String,
}

#[tracing::instrument(skip(state, headers, body), fields(len = body.len()))]
async fn create_session(
    State(state): State<NativeState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RendezvousError> {
    let content_type = header_str(&headers, CONTENT_TYPE);

    let outcome = state.store.create(content_type, body.to_vec())?;
    let url = state.url_builder.session_url(outcome.id);

    let mut response = (StatusCode::CREATED, Json(CreateResponseBody { url })).into_response();
    let out = response.headers_mut();
    out.insert(ETAG, header_value(&quote_etag(&outcome.etag)));
    out.insert(EXPIRES, header_value(&date::format_http_date(outcome.expires_at)));

    Ok(response)
}

#[tracing::instrument(skip(state, headers))]
async fn get_session(
    State(state): State<NativeState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, RendezvousError> {
    let id = parse_session_id(&id)?;
    let if_none_match = header_str(&headers, IF_NONE_MATCH).map(|v| unquote_etag(&v));

    match state.store.get(id, if_none_match.as_deref())? {
        GetOutcome::Hit(view) => {
            let content_type = HeaderValue::from_str(&view.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static(crate::store::DEFAULT_CONTENT_TYPE));

            let mut response = (StatusCode::OK, view.payload).into_response();
            let out = response.headers_mut();
            out.insert(CONTENT_TYPE, content_type);
            out.insert(ETAG, header_value(&quote_etag(&view.etag)));
            out.insert(EXPIRES, header_value(&date::format_http_date(view.expires_at)));
            Ok(response)
        }
        GetOutcome::NotModified { etag, expires_at } => {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            let out = response.headers_mut();
            out.insert(ETAG, header_value(&quote_etag(&etag)));
            out.insert(EXPIRES, header_value(&date::format_http_date(expires_at)));
            Ok(response)
        }
    }
}

#[tracing::instrument(skip(state, headers, body), fields(len = body.len()))]
async fn put_session(
    State(state): State<NativeState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RendezvousError> {
    let id = parse_session_id(&id)?;
    let if_match = header_str(&headers, IF_MATCH).map(|v| unquote_etag(&v));
    let content_type = header_str(&headers, CONTENT_TYPE);

    let outcome = state
        .store
        .update(id, if_match.as_deref(), content_type, body.to_vec())?;

    let mut response = StatusCode::ACCEPTED.into_response();
    let out = response.headers_mut();
    out.insert(ETAG, header_value(&quote_etag(&outcome.etag)));
    out.insert(EXPIRES, header_value(&date::format_http_date(outcome.expires_at)));

    Ok(response)
}

/// Always 204: DELETE is idempotent from the client's perspective, even for
/// an id that never existed or was already reaped (spec §4.4, §9 open
/// question).
#[tracing::instrument(skip(state))]
async fn delete_session(State(state): State<NativeState>, Path(id): Path<String>) -> Response {
    if let Ok(id) = id.parse::<SessionId>() {
        let _ = state.store.delete(id);
    }
    StatusCode::NO_CONTENT.into_response()
}

fn parse_session_id(raw: &str) -> Result<SessionId, RendezvousError> {
    raw.parse().map_err(|_| RendezvousError::NotFound)
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}
