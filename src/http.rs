//! Plain HTTP exposure of stored files.
//!
//! Serves the `links/` aliases: `GET /` is a Basic-auth-gated listing,
//! `GET /<filename>` streams the file as an attachment, or inline with
//! `?view=yes`.

use crate::config::Settings;
use crate::error::Result;
use crate::storage::Storage;
use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::Engine;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
struct HttpState {
    storage: Storage,
    settings: Arc<Settings>,
}

pub fn router(storage: Storage, settings: Arc<Settings>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/{name}", get(serve_file))
        .with_state(HttpState { storage, settings })
}

pub async fn serve(
    storage: Storage,
    settings: Arc<Settings>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&settings.server.http_address).await?;
    info!(addr = %settings.server.http_address, "http server listening");

    axum::serve(listener, router(storage, settings))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

/// `Authorization: Basic <base64 user:pass>` against the configured
/// credentials.
fn authorized(headers: &HeaderMap, settings: &Settings) -> bool {
    let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, pass)) = credentials.split_once(':') else {
        return false;
    };
    user == settings.auth.user && pass == settings.auth.password
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"hikup\"")],
        "Unauthorized\n",
    )
        .into_response()
}

async fn index(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    if !authorized(&headers, &state.settings) {
        return unauthorized();
    }

    let names = match list_links(&state.storage) {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, "listing links failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "listing failed\n").into_response();
        }
    };

    let mut page = String::from("<html><body><h1>Stored files</h1><ul>");
    for name in names {
        page.push_str(&format!("<li><a href=\"/{name}\">{name}</a></li>"));
    }
    page.push_str("</ul></body></html>");
    Html(page).into_response()
}

fn list_links(storage: &Storage) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(storage.links_dir())? {
        if let Some(name) = entry?.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

async fn serve_file(
    State(state): State<HttpState>,
    UrlPath(name): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Ok(path) = state.storage.resolve_link(&name) else {
        return (StatusCode::NOT_FOUND, "File not found\n").into_response();
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(_) => return (StatusCode::NOT_FOUND, "File not found\n").into_response(),
    };

    let inline = params.get("view").map(String::as_str) == Some("yes");
    (
        [(header::CONTENT_DISPOSITION, content_disposition(&name, inline))],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

fn content_disposition(name: &str, inline: bool) -> String {
    if inline {
        format!("inline; filename=\"{name}\"")
    } else {
        format!("attachment; filename=\"{name}\"")
    }
}
