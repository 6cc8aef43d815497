use crate::error::{AppError, Result};
use crate::model::{
    CreateUrlRequest, DeleteUrlResponse, ListUrlsQuery, ListUrlsResponse, UpdateUrlRequest,
    UrlResponse, ValidateUrlRequest, ValidateUrlResponse,
};
use crate::state::AppState;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use snip_core::{ClickContext, ShortCode};
use snip_shortener::ShortenerError;
use std::net::SocketAddr;
use tracing::debug;

const DEFAULT_LIMIT: i64 = 10;

fn parse_code(short_code: String) -> Result<ShortCode> {
    ShortCode::new(short_code).map_err(|e| ShortenerError::from(e).into())
}

pub async fn create_url_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateUrlRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UrlResponse>)> {
    let Json(request) = payload?;
    let response = state.shortener().create_url(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn validate_url_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ValidateUrlRequest>, JsonRejection>,
) -> Result<Json<ValidateUrlResponse>> {
    let Json(request) = payload?;
    match state.shortener().validate_url(&request.url).await {
        Ok(()) => Ok(Json(ValidateUrlResponse {
            valid: true,
            reason: None,
        })),
        Err(e) if e.is_client_error() => Ok(Json(ValidateUrlResponse {
            valid: false,
            reason: Some(e.to_string()),
        })),
        Err(e) => Err(e.into()),
    }
}

pub async fn get_url_handler(
    State(state): State<AppState>,
    path: std::result::Result<Path<String>, PathRejection>,
) -> Result<Json<UrlResponse>> {
    let Path(short_code) = path?;
    let code = parse_code(short_code)?;

    let entity = state
        .shortener()
        .get_url(&code)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(UrlResponse::from_entity(&entity, state.base_url())))
}

pub async fn update_url_handler(
    State(state): State<AppState>,
    path: std::result::Result<Path<String>, PathRejection>,
    payload: std::result::Result<Json<UpdateUrlRequest>, JsonRejection>,
) -> Result<Json<UrlResponse>> {
    let Path(short_code) = path?;
    let code = parse_code(short_code)?;
    let Json(request) = payload?;

    let response = state.shortener().update_url(&code, request).await?;
    Ok(Json(response))
}

pub async fn delete_url_handler(
    State(state): State<AppState>,
    path: std::result::Result<Path<String>, PathRejection>,
) -> Result<Json<DeleteUrlResponse>> {
    let Path(short_code) = path?;
    let code = parse_code(short_code)?;

    state.shortener().delete_url(&code).await?;
    Ok(Json(DeleteUrlResponse {
        short_code: code,
        deleted: true,
    }))
}

pub async fn list_urls_handler(
    State(state): State<AppState>,
    path: std::result::Result<Path<i64>, PathRejection>,
    query: std::result::Result<Query<ListUrlsQuery>, QueryRejection>,
) -> Result<Json<ListUrlsResponse>> {
    let Path(owner_id) = path?;
    let Query(query) = query?;
    let limit = query.limit.filter(|limit| *limit > 0).unwrap_or(DEFAULT_LIMIT);
    let offset = query.offset.unwrap_or_default().max(0);

    let urls = state.shortener().list_urls(owner_id, limit, offset).await?;
    Ok(Json(ListUrlsResponse {
        count: urls.len(),
        urls,
        limit,
        offset,
    }))
}

/// Follows a short code with a permanent redirect.
pub async fn redirect_handler(
    State(state): State<AppState>,
    Path(short_code): Path<String>,
    request: Request,
) -> Result<Response> {
    // Nothing that fails the code syntax can have been issued.
    let code = ShortCode::new(short_code).map_err(|_| AppError::NotFound)?;

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let context = click_context(request.headers(), peer);

    let target = state
        .shortener()
        .redirect(&code, context)
        .await?
        .ok_or(AppError::NotFound)?;
    debug!(code = %code, "Redirecting");

    Ok((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, target)]).into_response())
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// The first `X-Forwarded-For` hop wins over the socket peer.
fn click_context(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClickContext {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string);

    ClickContext {
        user_agent: header_str(headers, header::USER_AGENT),
        ip_address: forwarded
            .or_else(|| peer.map(|addr| addr.ip().to_string()))
            .unwrap_or_default(),
        referrer: header_str(headers, header::REFERER),
    }
}
