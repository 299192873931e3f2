use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::{
    error::{AppError, AppResult},
    middleware::request_id::RequestId,
    models::{NewRecommendation, Recommendation, RecommendationFilter, RecommendationPatch, Relation},
};

use super::{
    extract::{JsonPayload, PathParam, QueryParams},
    AppState,
};

// Request/Response types

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub paths: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Query string of the list endpoint; empty or zero values mean "no filter"
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "product-id", default, deserialize_with = "empty_as_none")]
    pub product_id: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub relation: Option<i64>,
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected an integer, got `{}`", value))),
    }
}

impl ListQuery {
    fn into_filter(self) -> AppResult<RecommendationFilter> {
        let relation = match self.relation {
            None | Some(0) => None,
            Some(code) => Some(
                Relation::try_from(code).map_err(|e| AppError::InvalidInput(e.to_string()))?,
            ),
        };

        Ok(RecommendationFilter {
            product_origin: self.product_id,
            product_target: None,
            relation,
        })
    }
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound(format!("Recommendation with id '{}' was not found.", id))
}

// Handlers

/// Service information at the root URL
pub async fn index() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "Recommendation REST API Service",
        version: env!("CARGO_PKG_VERSION"),
        paths: "/recommendations",
    })
}

/// Liveness check that also pings storage
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    state.store.ping().await?;
    Ok(Json(HealthResponse { status: "ok" }))
}

/// Retrieve a single recommendation, deleted or not
pub async fn get_recommendation(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
) -> AppResult<Json<Recommendation>> {
    tracing::info!(id, "Request for recommendation");

    let recommendation = state.store.find_by_id(id).await?.ok_or_else(|| not_found(id))?;
    Ok(Json(recommendation))
}

/// List live recommendations, optionally filtered by origin product and relation
pub async fn list_recommendations(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<ListQuery>,
) -> AppResult<Json<Vec<Recommendation>>> {
    let filter = params.into_filter()?;
    tracing::info!(?filter, "Request to list recommendations");

    let recommendations = state.store.find_by_attributes(filter, false).await?;
    Ok(Json(recommendations))
}

/// Create a recommendation, or revive the existing one with the same natural key
pub async fn create_recommendation(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    JsonPayload(body): JsonPayload,
) -> AppResult<impl IntoResponse> {
    let new = NewRecommendation::from_payload(&body)?;
    tracing::info!(
        request_id = %request_id,
        product_origin = new.product_origin,
        product_target = new.product_target,
        relation = %new.relation,
        "Request to create a recommendation"
    );

    let recommendation = state.store.upsert_or_revive(new).await?;
    let location = format!("/recommendations/{}", recommendation.id);

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(recommendation),
    ))
}

/// Replace the supplied fields of a recommendation
pub async fn update_recommendation(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
    JsonPayload(body): JsonPayload,
) -> AppResult<Json<Recommendation>> {
    tracing::info!(id, "Request to update recommendation");

    let patch = RecommendationPatch::from_payload(&body)?;
    let recommendation = state
        .store
        .update(id, patch)
        .await?
        .ok_or_else(|| not_found(id))?;

    Ok(Json(recommendation))
}

/// Add one dislike to a recommendation
pub async fn dislike_recommendation(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
) -> AppResult<Json<Recommendation>> {
    let recommendation = state
        .store
        .increment_dislike(id)
        .await?
        .ok_or_else(|| not_found(id))?;

    tracing::info!(id, dislike = recommendation.dislike, "Recommendation disliked");
    Ok(Json(recommendation))
}

/// Soft-delete a recommendation; absent or already deleted ids still succeed
pub async fn delete_recommendation(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
) -> AppResult<StatusCode> {
    let deleted = state.store.soft_delete(id).await?;
    tracing::info!(id, deleted, "Request to delete recommendation");

    Ok(StatusCode::NO_CONTENT)
}

/// Purge every recommendation
pub async fn reset_recommendations(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> AppResult<StatusCode> {
    let purged = state.store.delete_all().await?;
    tracing::info!(request_id = %request_id, purged, "Recommendations reset");

    Ok(StatusCode::NO_CONTENT)
}
