//! HTTP surface.
//!
//! | Route                             | Response                                  |
//! |-----------------------------------|-------------------------------------------|
//! | `GET /tiles/{map}/{z}/{x}/{y}.png` | tile image, `image/png`                  |
//! | `GET /maps`                       | JSON `{name: {minz, maxz}}`               |
//! | `GET /stats`                      | JSON counters, see [`StatsSnapshot`]      |
//! | anything else                     | `404`, `text/plain`                       |
//!
//! Tile errors map to `404` for unknown or out-of-range tiles and `500` for
//! everything else, with a one-line `text/plain` body.
//!
//! [`StatsSnapshot`]: crate::stats::StatsSnapshot

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::coord::TileAddress;
use crate::dispatcher::TileDispatcher;
use crate::response::TileError;

/// Content type of served tiles.
pub const TILE_CONTENT_TYPE: &str = "image/png";

const TILE_SUFFIX: &str = ".png";

/// Builds the router for `dispatcher`.
pub fn router(dispatcher: Arc<TileDispatcher>) -> Router {
    Router::new()
        .route("/tiles/:map/:z/:x/:file", get(get_tile))
        .route("/maps", get(list_maps))
        .route("/stats", get(get_stats))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&dispatcher),
            count_requests,
        ))
        .with_state(dispatcher)
}

async fn count_requests(
    State(dispatcher): State<Arc<TileDispatcher>>,
    request: Request,
    next: Next,
) -> Response {
    dispatcher.stats().record_http_request();
    next.run(request).await
}

/// Parses the path segments of a tile URL.
///
/// Returns `None` unless `z`, `x` and `y` are decimal numbers and `file` ends
/// in `.png`. Range checks are left to the dispatcher.
pub fn parse_tile_path(map: &str, z: &str, x: &str, file: &str) -> Option<TileAddress> {
    let y = file.strip_suffix(TILE_SUFFIX)?;
    Some(TileAddress::new(
        map,
        z.parse().ok()?,
        x.parse().ok()?,
        y.parse().ok()?,
    ))
}

async fn get_tile(
    State(dispatcher): State<Arc<TileDispatcher>>,
    Path((map, z, x, file)): Path<(String, String, String, String)>,
) -> Response {
    let Some(tile) = parse_tile_path(&map, &z, &x, &file) else {
        debug!(map = %map, z = %z, x = %x, file = %file, "Malformed tile path");
        return error_response(&TileError::NotFound("Not found".to_string()));
    };

    match dispatcher.fetch(tile).await {
        Ok(image) => tile_response(image),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Serialize)]
struct MapSummary {
    minz: u8,
    maxz: u8,
}

async fn list_maps(State(dispatcher): State<Arc<TileDispatcher>>) -> impl IntoResponse {
    let maps: BTreeMap<&str, MapSummary> = dispatcher
        .maps()
        .iter()
        .map(|map| {
            (
                map.name.as_str(),
                MapSummary {
                    minz: map.min_zoom,
                    maxz: map.max_zoom,
                },
            )
        })
        .collect();
    Json(maps).into_response()
}

async fn get_stats(State(dispatcher): State<Arc<TileDispatcher>>) -> impl IntoResponse {
    Json(dispatcher.stats_snapshot())
}

async fn not_found() -> Response {
    error_response(&TileError::NotFound("Not found".to_string()))
}

fn tile_response(image: Bytes) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, TILE_CONTENT_TYPE)],
        image,
    )
        .into_response()
}

fn error_response(error: &TileError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        format!("{}\n", error),
    )
        .into_response()
}
