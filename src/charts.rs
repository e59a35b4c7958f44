use crate::db::Database;
use crate::errors::AppResult;
use crate::filters::FilterValue;
use crate::registry::{ChartData, ChartFn, Registry};
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Arc;

static USAGE_CHART: Lazy<ChartFn> = Lazy::new(|| Arc::new(usage_per_day));

/// Queries per day over the trailing two weeks, scoped by the caller-supplied
/// predicate so it stays consistent with every other chart on the dashboard.
fn usage_per_day(
    db: &Database,
    where_clause: &str,
    params: &[FilterValue],
) -> AppResult<Vec<ChartData>> {
    let sql = format!(
        "SELECT date(queries.query_time) AS day, COUNT(queries.id)
         FROM queries
         JOIN users ON queries.user_id=users.id
         JOIN roles ON queries.role_id=roles.id
         JOIN classes ON roles.class_id=classes.id
         LEFT JOIN consumers ON classes.consumer_id=consumers.id
         WHERE {} AND queries.query_time > ?
         GROUP BY day
         ORDER BY day",
        where_clause
    );

    // Stored query times are UTC in SQLite's default text format.
    let cutoff = (Utc::now() - Duration::days(14))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    let mut bound: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
    bound.push(&cutoff);
    let rows = db.query_rows(&sql, &bound)?;

    let labels: Vec<serde_json::Value> = rows.iter().map(|row| row[0].clone()).collect();
    let counts: Vec<f64> = rows
        .iter()
        .map(|row| row[1].as_f64().unwrap_or(0.0))
        .collect();

    let mut series = BTreeMap::new();
    series.insert("queries".to_string(), counts);

    Ok(vec![ChartData::new(
        labels,
        series,
        vec!["#3392eb".to_string()],
    )])
}

pub fn register(registry: &mut Registry) {
    registry.register_chart(USAGE_CHART.clone());
}
