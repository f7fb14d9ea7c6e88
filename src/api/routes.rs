use crate::api::api_error::APIError;
use crate::api::model::{CreateRecordRequest, RecordFields};
use crate::api::server::AppState;
use crate::dkim::DkimKeys;
use crate::error::Error;
use crate::store::{normalize_domain, DomainRecord};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::WithRejection;
use serde_json::json;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub(super) fn new(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/records", get(list_records).post(create_record))
        .route(
            "/records/:domain",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route("/records/:domain/certificate", post(issue_certificate))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.api_timeout))
        .with_state(state)
}

#[allow(clippy::unused_async)]
async fn health_check() -> impl IntoResponse {
    Json(json!({"ok":"healthy"}))
}

async fn list_records(State(state): State<AppState>) -> Json<Vec<DomainRecord>> {
    let mut records = state.store.list().await;
    records.sort_by(|a, b| a.domain.cmp(&b.domain));
    Json(records)
}

async fn get_record(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<DomainRecord>, APIError> {
    let domain = normalize_domain(&domain)?;
    match state.store.get(&domain).await {
        Some(record) => Ok(Json(record)),
        None => Err(Error::RecordNotFound(domain).into()),
    }
}

async fn create_record(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<CreateRecordRequest>, APIError>,
) -> Result<(StatusCode, Json<DomainRecord>), APIError> {
    let mut record = payload.into_record(state.config.derive_ipv6)?;
    if state.store.get(&record.domain).await.is_some() {
        return Err(Error::RecordExists(record.domain).into());
    }
    if record.dkim_public_key.is_none() && record.dkim_private_key.is_none() {
        let keys = DkimKeys::generate_blocking().await?;
        record.dkim_public_key = Some(keys.public_key);
        record.dkim_private_key = Some(keys.private_key);
    }
    state.store.set(record.clone()).await?;
    tracing::info!("created record for \"{}\"", record.domain);
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_record(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    WithRejection(Json(payload), _): WithRejection<Json<RecordFields>, APIError>,
) -> Result<Json<DomainRecord>, APIError> {
    let domain = normalize_domain(&domain)?;
    let Some(mut record) = state.store.get(&domain).await else {
        return Err(Error::RecordNotFound(domain).into());
    };
    payload.apply(&mut record, state.config.derive_ipv6)?;
    state.store.set(record.clone()).await?;
    tracing::info!("updated record for \"{domain}\"");
    Ok(Json(record))
}

async fn delete_record(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<StatusCode, APIError> {
    let domain = normalize_domain(&domain)?;
    state.store.delete(&domain).await?;
    tracing::info!("deleted record for \"{domain}\"");
    Ok(StatusCode::NO_CONTENT)
}

async fn issue_certificate(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<DomainRecord>, APIError> {
    let record = state.issuer.issue_certificate(&domain).await?;
    Ok(Json(record))
}
