pub mod payload;

use accord_core::{
    AgreementController, AgreementError, AgreementKey, FieldChanges, PartyQuery, TokenScope,
    parse_access_token,
};
use accord_platform::{
    AccessTokenQuery, AgreementView, CreateAgreementResponse, MediaLinker, PartyQueryParams,
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::HOST},
    routing::{get, patch, post},
};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::error;

use crate::payload::AgreementPayload;

type ApiResult<T> = Result<T, (StatusCode, String)>;

#[derive(Clone)]
pub struct AppState {
    pub controller: AgreementController,
}

pub fn router(state: AppState) -> Router {
    let settings = state.controller.settings();
    let media_prefix = settings.storage_base_url.trim_end_matches('/').to_string();
    let media_root = settings.media_root.clone();

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/agreement/", post(create_agreement))
        .route("/agreement/access_token/", get(retrieve_by_query_token))
        .route(
            "/agreement/access_token_update/",
            patch(patch_by_query_token).put(put_by_query_token),
        )
        .route("/agreement/by_party/", get(find_by_party))
        .route(
            "/agreement/{key}/",
            get(retrieve_agreement)
                .put(put_agreement)
                .patch(patch_agreement)
                .delete(delete_agreement),
        )
        .route(
            "/agreement/{key}/patch_second_party/",
            patch(patch_second_party),
        )
        .route("/agreement/{key}/sign/", post(sign_agreement));

    let router = if media_prefix.starts_with('/') && media_prefix.len() > 1 {
        router.nest_service(&media_prefix, ServeDir::new(media_root))
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_agreement(
    State(state): State<AppState>,
    headers: HeaderMap,
    AgreementPayload(entries): AgreementPayload,
) -> ApiResult<(StatusCode, Json<CreateAgreementResponse>)> {
    let changes = FieldChanges::parse(entries).map_err(reject)?;
    let created = state.controller.create(changes).await.map_err(reject)?;

    let media = media_linker(&state, &headers);
    Ok((
        StatusCode::CREATED,
        Json(CreateAgreementResponse::render(&created, &media)),
    ))
}

async fn retrieve_agreement(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<AgreementView>> {
    let media = media_linker(&state, &headers);

    let view = match key.parse::<AgreementKey>().map_err(reject)? {
        AgreementKey::Id(id) => {
            let agreement = state.controller.retrieve_by_id(id).await.map_err(reject)?;
            AgreementView::for_counterparty(&agreement, &media)
        }
        AgreementKey::Token(token) => {
            let agreement = state
                .controller
                .retrieve_by_token(token)
                .await
                .map_err(reject)?;
            AgreementView::for_owner(&agreement, &media)
        }
    };

    Ok(Json(view))
}

async fn put_agreement(
    state: State<AppState>,
    key: Path<String>,
    headers: HeaderMap,
    payload: AgreementPayload,
) -> ApiResult<Json<AgreementView>> {
    update_agreement(state, key, headers, payload, false).await
}

async fn patch_agreement(
    state: State<AppState>,
    key: Path<String>,
    headers: HeaderMap,
    payload: AgreementPayload,
) -> ApiResult<Json<AgreementView>> {
    update_agreement(state, key, headers, payload, true).await
}

async fn update_agreement(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    AgreementPayload(entries): AgreementPayload,
    partial: bool,
) -> ApiResult<Json<AgreementView>> {
    let key = key.parse::<AgreementKey>().map_err(reject)?;
    let changes = FieldChanges::parse(entries).map_err(reject)?;
    let media = media_linker(&state, &headers);

    let view = match key {
        AgreementKey::Id(id) => {
            let agreement = state
                .controller
                .update_by_id(id, changes)
                .await
                .map_err(reject)?;
            AgreementView::for_counterparty(&agreement, &media)
        }
        AgreementKey::Token(token) => {
            let agreement = state
                .controller
                .update_by_token(token, changes, TokenScope::Full, partial)
                .await
                .map_err(reject)?;
            AgreementView::for_owner(&agreement, &media)
        }
    };

    Ok(Json(view))
}

async fn delete_agreement(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    let key = key.parse::<AgreementKey>().map_err(reject)?;
    state.controller.delete(key).await.map_err(reject)?;

    Ok(StatusCode::NO_CONTENT)
}

async fn retrieve_by_query_token(
    State(state): State<AppState>,
    Query(query): Query<AccessTokenQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<AgreementView>> {
    let token = parse_access_token(query.access_token.as_deref().unwrap_or_default())
        .map_err(reject)?;
    let agreement = state
        .controller
        .retrieve_by_token(token)
        .await
        .map_err(reject)?;

    let media = media_linker(&state, &headers);
    Ok(Json(AgreementView::for_owner(&agreement, &media)))
}

async fn put_by_query_token(
    state: State<AppState>,
    query: Query<AccessTokenQuery>,
    headers: HeaderMap,
    payload: AgreementPayload,
) -> ApiResult<Json<AgreementView>> {
    update_by_query_token(state, query, headers, payload, false).await
}

async fn patch_by_query_token(
    state: State<AppState>,
    query: Query<AccessTokenQuery>,
    headers: HeaderMap,
    payload: AgreementPayload,
) -> ApiResult<Json<AgreementView>> {
    update_by_query_token(state, query, headers, payload, true).await
}

async fn update_by_query_token(
    State(state): State<AppState>,
    Query(query): Query<AccessTokenQuery>,
    headers: HeaderMap,
    AgreementPayload(entries): AgreementPayload,
    partial: bool,
) -> ApiResult<Json<AgreementView>> {
    let token = parse_access_token(query.access_token.as_deref().unwrap_or_default())
        .map_err(reject)?;
    let changes = FieldChanges::parse(entries).map_err(reject)?;
    let agreement = state
        .controller
        .update_by_token(token, changes, TokenScope::Restricted, partial)
        .await
        .map_err(reject)?;

    let media = media_linker(&state, &headers);
    Ok(Json(AgreementView::for_owner(&agreement, &media)))
}

async fn find_by_party(
    State(state): State<AppState>,
    Query(params): Query<PartyQueryParams>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<AgreementView>>> {
    let query = PartyQuery::from_params(
        params.address,
        params.first_party_address,
        params.second_party_address,
    )
    .map_err(reject)?;
    let hits = state.controller.find_by_party(query).await.map_err(reject)?;

    let media = media_linker(&state, &headers);
    Ok(Json(
        hits.iter()
            .map(|hit| AgreementView::for_party_match(hit, &media))
            .collect(),
    ))
}

async fn patch_second_party(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    AgreementPayload(entries): AgreementPayload,
) -> ApiResult<Json<AgreementView>> {
    let id = record_id(&key)?;
    let changes = FieldChanges::parse(entries).map_err(reject)?;
    let agreement = state
        .controller
        .patch_second_party(id, changes)
        .await
        .map_err(reject)?;

    let media = media_linker(&state, &headers);
    Ok(Json(AgreementView::for_counterparty(&agreement, &media)))
}

async fn sign_agreement(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    mut payload: AgreementPayload,
) -> ApiResult<Json<AgreementView>> {
    let id = record_id(&key)?;
    let signature = payload.take_file(&["second_party_signature", "signature"]);
    let agreement = state
        .controller
        .sign(id, signature)
        .await
        .map_err(reject)?;

    let media = media_linker(&state, &headers);
    Ok(Json(AgreementView::for_counterparty(&agreement, &media)))
}

fn record_id(key: &str) -> ApiResult<i64> {
    key.parse::<i64>()
        .map_err(|_| reject(AgreementError::not_found()))
}

/// File URLs are absolute when the request names its host.
fn media_linker(state: &AppState, headers: &HeaderMap) -> MediaLinker {
    let origin = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| !host.is_empty())
        .map(|host| {
            let scheme = headers
                .get("x-forwarded-proto")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("http");
            format!("{scheme}://{host}")
        });

    MediaLinker::new(&state.controller.settings().storage_base_url, origin)
}

fn reject(err: AgreementError) -> (StatusCode, String) {
    match &err {
        AgreementError::Forbidden(_) => (StatusCode::FORBIDDEN, err.to_string()),
        AgreementError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        AgreementError::BadRequest(_)
        | AgreementError::AlreadySigned
        | AgreementError::Validation(_) => invalid_request(&err),
        AgreementError::Notification(_) | AgreementError::Internal(_) => {
            error!("request failed: {err:#}");
            internal_error(&err)
        }
    }
}

pub(crate) fn invalid_request<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
