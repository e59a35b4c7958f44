use crate::auth::{Auth, Role};
use crate::db::{DataRow, Database};
use crate::errors::{AppError, AppResult};
use crate::filters::FilterSet;
use crate::registry::Registry;
use serde::Serialize;

/// The current user's own rows from any registered data source, scoped by a
/// programmatically-added `user` filter.
pub fn user_history(
    registry: &Registry,
    db: &Database,
    auth: &Auth,
    kind: &str,
    limit: i64,
) -> AppResult<Vec<DataRow>> {
    let fetch = registry.source(kind)?;
    let mut filters = FilterSet::new();
    filters.add(registry, db, "user", auth.user_id, false)?;
    fetch(db, &filters, limit, 0)
}

#[derive(Debug, Serialize)]
pub struct QueryDetail {
    pub row: DataRow,
    pub responses: serde_json::Value,
}

/// Single-query detail with role-aware scoping: admins see any query,
/// instructors see their class's queries plus their own, everyone else sees
/// only their own.
pub fn get_query(db: &Database, auth: &Auth, query_id: i64) -> AppResult<QueryDetail> {
    const SELECT: &str = "SELECT
            queries.id, users.display_name, queries.query_time, queries.language,
            queries.code, queries.error, queries.issue, queries.response_text
         FROM queries
         JOIN users ON queries.user_id=users.id";

    let row = if auth.is_admin {
        db.query_optional_row(&format!("{} WHERE queries.id=?", SELECT), &[&query_id])?
    } else if auth.role == Role::Instructor {
        db.query_optional_row(
            &format!(
                "{} JOIN roles ON queries.role_id=roles.id
                 WHERE (roles.class_id=? OR queries.user_id=?) AND queries.id=?",
                SELECT
            ),
            &[&auth.class_id, &auth.user_id, &query_id],
        )?
    } else {
        db.query_optional_row(
            &format!("{} WHERE queries.user_id=? AND queries.id=?", SELECT),
            &[&auth.user_id, &query_id],
        )?
    };

    let row = row.ok_or_else(|| AppError::NotFound(format!("no such query: {}", query_id)))?;

    // response_text is the last selected column; it holds the stored LLM
    // response JSON, possibly empty when the original request errored.
    let responses = match row.last() {
        Some(serde_json::Value::String(text)) if !text.is_empty() => {
            serde_json::from_str(text).unwrap_or_else(|_| serde_json::json!({ "error": text }))
        }
        _ => serde_json::json!({
            "error": "*No response -- an error occurred.  Please try again.*"
        }),
    };

    Ok(QueryDetail { row, responses })
}
