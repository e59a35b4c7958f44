use crate::auth::{Auth, AuthProvider, Role};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::filters::FilterSet;
use crate::instructor;
use crate::registry::{ChartData, Registry};
use crate::student;
use crate::tables::{csv_filename, render_csv};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub registry: Arc<Registry>,
    pub auth: Arc<dyn AuthProvider>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/instructor/", get(instructor_main))
        .route("/instructor/csv/{kind}", get(instructor_csv))
        .route("/admin/charts", get(admin_charts))
        .route("/admin/export/{name}", get(admin_export))
        .route("/user/history/{kind}", get(user_history))
        .route("/query/{query_id}", get(query_detail))
        .with_state(state)
}

fn require_instructor(auth: &Auth) -> AppResult<()> {
    if auth.role == Role::Instructor || auth.is_admin {
        Ok(())
    } else {
        Err(AppError::Forbidden("instructor role required".to_string()))
    }
}

fn require_admin(auth: &Auth) -> AppResult<()> {
    if auth.is_admin {
        Ok(())
    } else {
        Err(AppError::Forbidden("admin required".to_string()))
    }
}

#[derive(serde::Serialize)]
struct InstructorView {
    users: Vec<crate::db::DataRow>,
    queries: Vec<crate::db::DataRow>,
    selected_user: Option<String>,
    /// Per-row drill-down link for the roster table; carries the literal
    /// `${value}` placeholder the rendering layer substitutes per row.
    user_link_template: String,
}

/// Roster plus query log for the caller's class, optionally narrowed to one
/// user via the `user` query parameter.
async fn instructor_main(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> AppResult<Json<InstructorView>> {
    let auth = state.auth.authenticate(&headers)?;
    require_instructor(&auth)?;

    let users = instructor::class_users(&state.registry, &state.db, &auth)?;

    let selected_user_id: Option<i64> = params.get("user").and_then(|raw| raw.parse().ok());

    // Resolve the selected user's name from the roster already in hand; an id
    // outside this class simply resolves to no name.
    let selected_user = selected_user_id.and_then(|id| {
        users
            .iter()
            .find(|row| row.get(1) == Some(&serde_json::Value::from(id)))
            .and_then(|row| row.get(2))
            .and_then(|cell| cell.as_str())
            .map(ToString::to_string)
    });

    let queries = instructor::class_queries(&state.registry, &state.db, &auth, selected_user_id)?;

    let filters = FilterSet::from_params(&state.registry, &state.db, &params, false)?;
    let user_link_template = filters.row_link_template("user")?;

    Ok(Json(InstructorView {
        users,
        queries,
        selected_user,
        user_link_template,
    }))
}

/// CSV export of the class query log or roster. Any other kind is a 404.
async fn instructor_csv(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let auth = state.auth.authenticate(&headers)?;
    require_instructor(&auth)?;

    let (filename, body) = instructor::export_csv(&state.registry, &state.db, &auth, &kind)?;
    csv_response(&filename, body)
}

/// All registered dashboard charts, each scoped by the same predicate derived
/// from the request's filter selection.
async fn admin_charts(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<ChartData>>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&auth)?;

    let filters = FilterSet::from_params(&state.registry, &state.db, &params, true)?;
    let selected: Vec<&str> = state
        .registry
        .filter_specs()
        .map(|spec| spec.name)
        .collect();
    let (where_clause, where_params) = filters.where_clause(&selected);

    let mut charts = Vec::new();
    for generator in state.registry.charts() {
        charts.extend(generator(&state.db, &where_clause, &where_params)?);
    }
    Ok(Json(charts))
}

/// Export any registered data source as CSV, scoped by the request's filters.
async fn admin_export(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&auth)?;

    let fetch = state
        .registry
        .source(&name)
        .map_err(|_| AppError::InvalidExportKind(name.clone()))?;
    let table = state.registry.table(&name)?;

    let filters = FilterSet::from_params(&state.registry, &state.db, &params, false)?;
    let rows = fetch(&state.db, &filters, -1, 0)?;

    csv_response(&csv_filename("all", &name), render_csv(&table, &rows))
}

/// The caller's own history from a registered data source.
async fn user_history(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<crate::db::DataRow>>> {
    let auth = state.auth.authenticate(&headers)?;
    let limit: i64 = params
        .get("limit")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(10);

    let rows = student::user_history(&state.registry, &state.db, &auth, &kind, limit)
        .map_err(|err| match err {
            AppError::UnknownDataSource(name) => AppError::NotFound(name),
            other => other,
        })?;
    Ok(Json(rows))
}

/// Detail view of a single query, role-scoped.
async fn query_detail(
    State(state): State<AppState>,
    Path(query_id): Path<i64>,
    headers: HeaderMap,
) -> AppResult<Json<student::QueryDetail>> {
    let auth = state.auth.authenticate(&headers)?;
    let detail = student::get_query(&state.db, &auth, query_id)?;
    Ok(Json(detail))
}

fn csv_response(filename: &str, body: Vec<u8>) -> AppResult<Response> {
    let disposition = format!("attachment; filename=\"{}\"", filename);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
