use crate::auth::Auth;
use crate::db::{DataRow, Database};
use crate::errors::{AppError, AppResult};
use crate::filters::FilterSet;
use crate::registry::{FetchFn, Registry};
use crate::tables::{csv_filename, render_csv, DataTable};
use once_cell::sync::Lazy;
use std::sync::Arc;

pub const QUERIES_SOURCE: &str = "queries";
pub const USERS_SOURCE: &str = "users";

pub const QUERY_COLUMNS: &[&str] = &[
    "id",
    "display_name",
    "email",
    "query_time",
    "language",
    "code",
    "error",
    "issue",
    "response_text",
];

/// Roster columns. `role_id` leads the row so the UI can build row-selection
/// links; it is export-hidden and never shown as data.
pub const USER_COLUMNS: &[&str] = &[
    "role_id",
    "id",
    "display_name",
    "email",
    "auth_provider",
    "auth_name",
    "num_queries",
    "num_recent_queries",
    "active",
    "instructor_role",
];

// Fetch closures are held in statics so repeated registration (tests, app
// variants sharing this module) passes the identical-registration check.
static FETCH_QUERIES: Lazy<FetchFn> = Lazy::new(|| Arc::new(fetch_queries));
static FETCH_USERS: Lazy<FetchFn> = Lazy::new(|| Arc::new(fetch_users));

/// Query log, most recent first: one row per submitted query with the
/// submitting user's identity joined in.
fn fetch_queries(db: &Database, filters: &FilterSet, limit: i64, offset: i64) -> AppResult<Vec<DataRow>> {
    let (where_clause, where_params) = filters.where_clause(&["consumer", "class", "user", "query"]);

    let sql = format!(
        "SELECT
            queries.id,
            users.display_name,
            users.email,
            queries.query_time,
            queries.language,
            queries.code,
            queries.error,
            queries.issue,
            queries.response_text
         FROM queries
         JOIN users ON queries.user_id=users.id
         JOIN roles ON queries.role_id=roles.id
         JOIN classes ON roles.class_id=classes.id
         LEFT JOIN consumers ON classes.consumer_id=consumers.id
         WHERE {}
         ORDER BY queries.query_time DESC
         LIMIT ? OFFSET ?",
        where_clause
    );

    let mut params: Vec<&dyn rusqlite::ToSql> = where_params
        .iter()
        .map(|p| p as &dyn rusqlite::ToSql)
        .collect();
    params.push(&limit);
    params.push(&offset);

    db.query_rows(&sql, &params)
}

/// Class roster with per-user query counts: total, and a trailing-7-day
/// window computed as a conditional sum over the date cutoff.
fn fetch_users(db: &Database, filters: &FilterSet, limit: i64, offset: i64) -> AppResult<Vec<DataRow>> {
    let (where_clause, where_params) = filters.where_clause(&["consumer", "class", "user"]);

    let sql = format!(
        "SELECT
            roles.id AS role_id,
            users.id,
            users.display_name,
            users.email,
            auth_providers.name AS auth_provider,
            users.auth_name,
            COUNT(queries.id) AS num_queries,
            COALESCE(SUM(CASE WHEN queries.query_time > datetime('now', '-7 days') THEN 1 ELSE 0 END), 0)
                AS num_recent_queries,
            roles.active,
            roles.role = 'instructor' AS instructor_role
         FROM users
         LEFT JOIN auth_providers ON users.auth_provider=auth_providers.id
         JOIN roles ON roles.user_id=users.id
         JOIN classes ON roles.class_id=classes.id
         LEFT JOIN consumers ON classes.consumer_id=consumers.id
         LEFT JOIN queries ON queries.role_id=roles.id
         WHERE {}
         GROUP BY users.id
         ORDER BY users.display_name
         LIMIT ? OFFSET ?",
        where_clause
    );

    let mut params: Vec<&dyn rusqlite::ToSql> = where_params
        .iter()
        .map(|p| p as &dyn rusqlite::ToSql)
        .collect();
    params.push(&limit);
    params.push(&offset);

    db.query_rows(&sql, &params)
}

/// Register the instructor reporting sources. Safe to call more than once.
pub fn register(registry: &mut Registry) -> AppResult<()> {
    registry.register_source(
        QUERIES_SOURCE,
        FETCH_QUERIES.clone(),
        DataTable::new(QUERIES_SOURCE, QUERY_COLUMNS),
    )?;

    // Roster rows link to the query log narrowed to the clicked user; the
    // template carries the ${value} placeholder the rendering layer fills in
    // per row.
    let user_link = FilterSet::new().row_link_template("user")?;
    registry.register_source(
        USERS_SOURCE,
        FETCH_USERS.clone(),
        DataTable::new(USERS_SOURCE, USER_COLUMNS)
            .with_export_hidden(&[0])
            .with_link_template(&user_link),
    )?;
    Ok(())
}

/// Query log for the authenticated instructor's class, optionally narrowed to
/// one user. The class id comes from server-side auth state only.
pub fn class_queries(
    registry: &Registry,
    db: &Database,
    auth: &Auth,
    user: Option<i64>,
) -> AppResult<Vec<DataRow>> {
    let mut filters = FilterSet::new();
    filters.add(registry, db, "class", auth.class_id, false)?;
    if let Some(user_id) = user {
        filters.add(registry, db, "user", user_id, false)?;
    }
    let fetch = registry.source(QUERIES_SOURCE)?;
    fetch(db, &filters, -1, 0)
}

/// Roster for the authenticated instructor's class.
pub fn class_users(registry: &Registry, db: &Database, auth: &Auth) -> AppResult<Vec<DataRow>> {
    let mut filters = FilterSet::new();
    filters.add(registry, db, "class", auth.class_id, false)?;
    let fetch = registry.source(USERS_SOURCE)?;
    fetch(db, &filters, -1, 0)
}

/// Class-scoped CSV export. Returns the attachment filename and body;
/// anything other than the two known kinds is `InvalidExportKind`.
pub fn export_csv(
    registry: &Registry,
    db: &Database,
    auth: &Auth,
    kind: &str,
) -> AppResult<(String, Vec<u8>)> {
    let rows = match kind {
        QUERIES_SOURCE => class_queries(registry, db, auth, None)?,
        USERS_SOURCE => class_users(registry, db, auth)?,
        other => return Err(AppError::InvalidExportKind(other.to_string())),
    };

    let table = registry.table(kind)?;
    Ok((
        csv_filename(&auth.class_name, kind),
        render_csv(&table, &rows),
    ))
}
