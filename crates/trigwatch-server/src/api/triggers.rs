use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trigwatch_common::problem::TargetVerification;
use trigwatch_common::types::Trigger;
use trigwatch_storage::OpContext;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::{app_error_response, success_response, ApiError};
use crate::controller::{self, SavedTrigger, SearchPage, SearchRequest};
use crate::error::AppError;
use crate::logging::TraceId;
use crate::middleware::AuthUser;
use crate::search::{parse_bool_flag, request_tags, search_text, SearchOptions};
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ValidateParams {
    /// Reject the trigger when any target verification tree has an error
    validate: Option<String>,
}

/// Query accepted by the search endpoints. Parsed by hand from the raw pairs
/// because tags arrive as `tags[0]`, `tags[1]`, ...
#[allow(dead_code)]
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct SearchParams {
    /// Tag filters, `tags[0]=a&tags[1]=b`; a gap ends the list
    #[serde(rename = "tags[0]")]
    tags: Option<String>,
    /// Case-insensitive, percent-encoded search text
    text: Option<String>,
    /// Only triggers currently in a problem state
    #[serde(rename = "onlyProblems")]
    only_problems: Option<String>,
    /// Page number, from 0
    p: Option<usize>,
    /// Page size, default from configuration
    size: Option<usize>,
    /// Persist the result ids as a pager
    #[serde(rename = "createPager")]
    create_pager: Option<String>,
    /// Pager to create or reuse
    #[serde(rename = "pagerID")]
    pager_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct PagerParams {
    #[serde(rename = "pagerID")]
    pager_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
struct TriggerList {
    list: Vec<Trigger>,
}

#[derive(Serialize, ToSchema)]
struct SavedTriggerResponse {
    id: String,
    trigger: Trigger,
    /// Series each target resolved to at bind time, keyed `t1`, `t2`, ...
    time_series_names: BTreeMap<String, Vec<String>>,
    checks: Vec<TargetVerification>,
}

impl From<SavedTrigger> for SavedTriggerResponse {
    fn from(saved: SavedTrigger) -> Self {
        Self {
            id: saved.trigger.id.clone(),
            trigger: saved.trigger,
            time_series_names: saved.time_series_names,
            checks: saved.checks,
        }
    }
}

#[derive(Serialize, ToSchema)]
struct CheckResponse {
    checks: Vec<TargetVerification>,
}

#[derive(Serialize, ToSchema)]
struct SearchResponse {
    list: Vec<Trigger>,
    page: usize,
    size: usize,
    total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pager_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pager_expire_at: Option<DateTime<Utc>>,
}

impl From<SearchPage> for SearchResponse {
    fn from(page: SearchPage) -> Self {
        Self {
            list: page.list,
            page: page.page,
            size: page.size,
            total: page.total,
            pager_id: page.pager_id,
            pager_expire_at: page.pager_expire_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
struct PagerDeleted {
    pager_id: String,
    existed: bool,
}

#[derive(Serialize, ToSchema)]
struct TriggerDeleted {
    id: String,
}

fn respond<T, D>(trace_id: &str, result: Result<T, AppError>) -> Response
where
    D: Serialize + From<T>,
{
    match result {
        Ok(value) => success_response(StatusCode::OK, trace_id, D::from(value)),
        Err(e) => app_error_response(trace_id, &e),
    }
}

fn body_or_error(body: Result<Json<Trigger>, JsonRejection>) -> Result<Trigger, AppError> {
    body.map(|Json(trigger)| trigger)
        .map_err(|e| AppError::InvalidRequest(e.body_text()))
}

fn query_value<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Unparsable numbers fall back to the defaults.
fn search_request(query: &[(String, String)]) -> SearchRequest {
    SearchRequest {
        options: SearchOptions {
            tags: request_tags(query),
            text: search_text(query_value(query, "text")),
            only_problems: parse_bool_flag(query_value(query, "onlyProblems")),
        },
        page: query_value(query, "p").and_then(|v| v.trim().parse().ok()),
        size: query_value(query, "size").and_then(|v| v.trim().parse().ok()),
        create_pager: parse_bool_flag(query_value(query, "createPager")),
        pager_id: query_value(query, "pagerID").map(str::to_string),
    }
}

/// List every trigger.
#[utoipa::path(
    get,
    path = "/v1/triggers",
    tag = "Triggers",
    responses(
        (status = 200, description = "All triggers", body = TriggerList),
        (status = 503, description = "Backing store unavailable", body = ApiError)
    )
)]
async fn list_triggers(
    Extension(trace_id): Extension<TraceId>,
    Extension(ctx): Extension<OpContext>,
    State(state): State<AppState>,
) -> Response {
    let result = controller::list_triggers(&state, &ctx)
        .await
        .map(|list| TriggerList { list });
    respond::<_, TriggerList>(&trace_id, result)
}

/// Create a trigger. Targets are bound and verified; with `validate=true`
/// any verification error rejects the trigger and the trees are returned.
#[utoipa::path(
    put,
    path = "/v1/triggers",
    tag = "Triggers",
    params(ValidateParams),
    request_body = Trigger,
    responses(
        (status = 200, description = "Trigger created", body = SavedTriggerResponse),
        (status = 400, description = "Invalid trigger or failing targets", body = ApiError),
        (status = 409, description = "Same rule already exists or is being created", body = ApiError),
        (status = 502, description = "Remote server bad response", body = ApiError),
        (status = 503, description = "Remote server or backing store unavailable", body = ApiError)
    )
)]
async fn create_trigger(
    Extension(trace_id): Extension<TraceId>,
    Extension(ctx): Extension<OpContext>,
    Extension(user): Extension<AuthUser>,
    State(state): State<AppState>,
    Query(params): Query<ValidateParams>,
    body: Result<Json<Trigger>, JsonRejection>,
) -> Response {
    let validate = parse_bool_flag(params.validate.as_deref());
    let result = match body_or_error(body) {
        Ok(trigger) => controller::create_trigger(&state, &ctx, trigger, validate, user.0).await,
        Err(e) => Err(e),
    };
    respond::<_, SavedTriggerResponse>(&trace_id, result)
}

/// Dry-run verification of the trigger's targets.
#[utoipa::path(
    put,
    path = "/v1/triggers/check",
    tag = "Triggers",
    request_body = Trigger,
    responses(
        (status = 200, description = "One problem tree per target", body = CheckResponse),
        (status = 400, description = "Invalid trigger", body = ApiError),
        (status = 503, description = "Backing store unavailable", body = ApiError)
    )
)]
async fn check_trigger(
    Extension(trace_id): Extension<TraceId>,
    Extension(ctx): Extension<OpContext>,
    State(state): State<AppState>,
    body: Result<Json<Trigger>, JsonRejection>,
) -> Response {
    let result = match body_or_error(body) {
        Ok(trigger) => controller::check_trigger(&state, &ctx, trigger).await,
        Err(e) => Err(e),
    };
    respond::<_, CheckResponse>(&trace_id, result.map(|checks| CheckResponse { checks }))
}

/// Search triggers by tags, text and problem state, optionally through a
/// stored pager.
#[utoipa::path(
    get,
    path = "/v1/triggers/search",
    tag = "Triggers",
    params(SearchParams),
    responses(
        (status = 200, description = "One page of matching triggers", body = SearchResponse),
        (status = 404, description = "Pager not found or expired", body = ApiError)
    )
)]
async fn search_triggers(
    Extension(trace_id): Extension<TraceId>,
    Extension(ctx): Extension<OpContext>,
    State(state): State<AppState>,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    let result = controller::search_triggers(&state, &ctx, search_request(&query)).await;
    respond::<_, SearchResponse>(&trace_id, result)
}

/// Deprecated alias of `/v1/triggers/search`, kept for old clients.
#[utoipa::path(
    get,
    path = "/v1/triggers/page",
    tag = "Triggers",
    params(SearchParams),
    responses(
        (status = 200, description = "One page of matching triggers", body = SearchResponse)
    )
)]
async fn search_triggers_page(
    Extension(trace_id): Extension<TraceId>,
    Extension(ctx): Extension<OpContext>,
    State(state): State<AppState>,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    tracing::warn!(
        trace_id = trace_id.0.as_str(),
        "GET /v1/triggers/page is deprecated, use /v1/triggers/search"
    );
    let result = controller::search_triggers(&state, &ctx, search_request(&query)).await;
    respond::<_, SearchResponse>(&trace_id, result)
}

/// Delete a search pager. Deleting an unknown pager succeeds.
#[utoipa::path(
    delete,
    path = "/v1/triggers/search/pager",
    tag = "Triggers",
    params(PagerParams),
    responses(
        (status = 200, description = "Pager removed", body = PagerDeleted),
        (status = 400, description = "pagerID missing", body = ApiError)
    )
)]
async fn delete_pager(
    Extension(trace_id): Extension<TraceId>,
    Extension(ctx): Extension<OpContext>,
    State(state): State<AppState>,
    Query(params): Query<PagerParams>,
) -> Response {
    let result = match params.pager_id.filter(|id| !id.trim().is_empty()) {
        Some(pager_id) => controller::delete_pager(&state, &ctx, &pager_id)
            .await
            .map(|existed| PagerDeleted { pager_id, existed }),
        None => Err(AppError::InvalidRequest("pagerID is required".into())),
    };
    respond::<_, PagerDeleted>(&trace_id, result)
}

#[utoipa::path(
    get,
    path = "/v1/triggers/{id}",
    tag = "Triggers",
    params(("id" = String, Path, description = "Trigger id")),
    responses(
        (status = 200, description = "Trigger", body = Trigger),
        (status = 404, description = "Trigger not found", body = ApiError)
    )
)]
async fn get_trigger(
    Extension(trace_id): Extension<TraceId>,
    Extension(ctx): Extension<OpContext>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    respond::<_, Trigger>(&trace_id, controller::get_trigger(&state, &ctx, &id).await)
}

/// Replace a trigger definition. The target count cannot change.
#[utoipa::path(
    put,
    path = "/v1/triggers/{id}",
    tag = "Triggers",
    params(("id" = String, Path, description = "Trigger id"), ValidateParams),
    request_body = Trigger,
    responses(
        (status = 200, description = "Trigger updated", body = SavedTriggerResponse),
        (status = 400, description = "Invalid trigger or failing targets", body = ApiError),
        (status = 404, description = "Trigger not found", body = ApiError),
        (status = 409, description = "Rule collides with another trigger or is being updated", body = ApiError)
    )
)]
async fn update_trigger(
    Extension(trace_id): Extension<TraceId>,
    Extension(ctx): Extension<OpContext>,
    Extension(user): Extension<AuthUser>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ValidateParams>,
    body: Result<Json<Trigger>, JsonRejection>,
) -> Response {
    let validate = parse_bool_flag(params.validate.as_deref());
    let result = match body_or_error(body) {
        Ok(trigger) => {
            controller::update_trigger(&state, &ctx, &id, trigger, validate, user.0).await
        }
        Err(e) => Err(e),
    };
    respond::<_, SavedTriggerResponse>(&trace_id, result)
}

#[utoipa::path(
    delete,
    path = "/v1/triggers/{id}",
    tag = "Triggers",
    params(("id" = String, Path, description = "Trigger id")),
    responses(
        (status = 200, description = "Trigger deleted", body = TriggerDeleted),
        (status = 404, description = "Trigger not found", body = ApiError)
    )
)]
async fn delete_trigger(
    Extension(trace_id): Extension<TraceId>,
    Extension(ctx): Extension<OpContext>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let result = controller::delete_trigger(&state, &ctx, &id)
        .await
        .map(|()| TriggerDeleted { id });
    respond::<_, TriggerDeleted>(&trace_id, result)
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_triggers, create_trigger))
        .routes(routes!(check_trigger))
        .routes(routes!(search_triggers))
        .routes(routes!(search_triggers_page))
        .routes(routes!(delete_pager))
        .routes(routes!(get_trigger, update_trigger, delete_trigger))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn search_query_is_parsed_from_raw_pairs() {
        let request = search_request(&pairs(&[
            ("tags[0]", "prod"),
            ("tags[1]", "web"),
            ("text", "CPU%20High"),
            ("onlyProblems", "true"),
            ("p", "2"),
            ("size", "25"),
            ("createPager", "1"),
            ("pagerID", "abc"),
        ]));
        assert_eq!(request.options.tags, vec!["prod", "web"]);
        assert_eq!(request.options.text, "cpu high");
        assert!(request.options.only_problems);
        assert_eq!(request.page, Some(2));
        assert_eq!(request.size, Some(25));
        assert!(request.create_pager);
        assert_eq!(request.pager_id.as_deref(), Some("abc"));
    }

    #[test]
    fn bad_numbers_and_flags_fall_back_to_defaults() {
        let request = search_request(&pairs(&[
            ("p", "two"),
            ("size", "-1"),
            ("onlyProblems", "yes"),
        ]));
        assert_eq!(request.page, None);
        assert_eq!(request.size, None);
        assert!(!request.options.only_problems);
        assert!(!request.create_pager);
        assert!(request.options.tags.is_empty());
    }
}
