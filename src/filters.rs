use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::registry::Registry;
use rusqlite::types::ToSqlOutput;
use rusqlite::ToSql;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A filter value as supplied by a caller. Values are only ever passed to the
/// database as bound parameters, never spliced into SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Str(String),
    Int(i64),
}

impl FilterValue {
    /// Request parameters arrive as strings; integer-looking values are kept
    /// as integers so they bind with the right SQLite affinity.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => Self::Int(n),
            Err(_) => Self::Str(raw.to_string()),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{}", n),
        }
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl ToSql for FilterValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Str(s) => s.to_sql(),
            Self::Int(n) => n.to_sql(),
        }
    }
}

/// One registered filter dimension: the name that appears in URLs, the vetted
/// SQL column it predicates on, and an optional single-parameter query that
/// resolves a raw value into a display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub name: &'static str,
    pub column: &'static str,
    pub display_query: Option<&'static str>,
}

impl FilterSpec {
    pub const fn new(
        name: &'static str,
        column: &'static str,
        display_query: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            column,
            display_query,
        }
    }
}

/// One active filter dimension in a request.
#[derive(Debug, Clone)]
pub struct Filter {
    pub spec: Arc<FilterSpec>,
    pub value: FilterValue,
    pub display_value: Option<String>,
}

/// Request-scoped collection of active filters.
///
/// Insertion order is preserved; adding a second filter for the same spec name
/// replaces the earlier one (last write wins).
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter set from request query parameters.
    ///
    /// Every registered filter name present in `params` is bound; parameter
    /// names that are not registered filters are ignored, since a request's
    /// query string routinely carries unrelated state. When `with_display` is
    /// set, each spec's display query (if any) runs once with the value as its
    /// sole bound parameter.
    pub fn from_params(
        registry: &Registry,
        db: &Database,
        params: &HashMap<String, String>,
        with_display: bool,
    ) -> AppResult<Self> {
        let mut filters = Self::new();
        for spec in registry.filter_specs() {
            if let Some(raw) = params.get(spec.name) {
                filters.push(db, spec, FilterValue::parse(raw), with_display)?;
            }
        }
        Ok(filters)
    }

    /// Programmatic equivalent of `from_params` for server-side code building
    /// a scoped view. Unlike request parsing, an unregistered name here is a
    /// caller bug and fails with `UnknownFilter`.
    pub fn add(
        &mut self,
        registry: &Registry,
        db: &Database,
        name: &str,
        value: impl Into<FilterValue>,
        with_display: bool,
    ) -> AppResult<()> {
        let spec = registry.filter_spec(name)?;
        self.push(db, spec, value.into(), with_display)
    }

    fn push(
        &mut self,
        db: &Database,
        spec: Arc<FilterSpec>,
        value: FilterValue,
        with_display: bool,
    ) -> AppResult<()> {
        let display_value = match (with_display, spec.display_query) {
            (true, Some(query)) => db.query_display(query, &value)?,
            _ => None,
        };

        // Last write wins when the same dimension is added twice.
        self.filters.retain(|f| f.spec.name != spec.name);
        self.filters.push(Filter {
            spec,
            value,
            display_value,
        });
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.spec.name == name)
    }

    /// Compose the WHERE fragment for the filters a data source understands.
    ///
    /// Only filters whose name appears in `selected` contribute; everything
    /// else is silently excluded so a source can opt into just the dimensions
    /// it knows how to scope by. With nothing selected the predicate is `"1"`,
    /// an unconditional match, paired with no parameters.
    pub fn where_clause(&self, selected: &[&str]) -> (String, Vec<FilterValue>) {
        let active: Vec<&Filter> = self
            .filters
            .iter()
            .filter(|f| selected.contains(&f.spec.name))
            .collect();

        if active.is_empty() {
            return ("1".to_string(), Vec::new());
        }

        let predicate = active
            .iter()
            .map(|f| format!("{}=?", f.spec.column))
            .collect::<Vec<_>>()
            .join(" AND ");
        let params = active.iter().map(|f| f.value.clone()).collect();
        (predicate, params)
    }

    /// URL query string carrying every active filter, for "keep all current
    /// filters" links. Always `?`-prefixed, possibly just `"?"`.
    pub fn query_string(&self) -> AppResult<String> {
        encode_pairs(self.filters.iter())
    }

    /// Same as `query_string` but omitting one dimension, used to build links
    /// that replace that dimension.
    pub fn query_string_without(&self, exclude_name: &str) -> AppResult<String> {
        encode_pairs(self.filters.iter().filter(|f| f.spec.name != exclude_name))
    }

    /// Link template for per-row drill-down.
    ///
    /// The returned string ends with a literal `&<name>=${value}` suffix. The
    /// `${value}` token is a wire contract with the rendering layer, which
    /// substitutes each row's own value client-side; it must be passed through
    /// verbatim, not escaped.
    pub fn row_link_template(&self, name: &str) -> AppResult<String> {
        Ok(format!(
            "{}&{}=${{value}}",
            self.query_string_without(name)?,
            name
        ))
    }
}

fn encode_pairs<'a>(filters: impl Iterator<Item = &'a Filter>) -> AppResult<String> {
    let pairs: Vec<(&str, String)> = filters
        .map(|f| (f.spec.name, f.value.to_string()))
        .collect();
    let encoded =
        serde_urlencoded::to_string(&pairs).map_err(|err| AppError::Internal(err.to_string()))?;
    Ok(format!("?{}", encoded))
}

#[cfg(test)]
mod tests {
    use super::{FilterSet, FilterValue};
    use crate::db::Database;
    use crate::registry::Registry;
    use std::collections::HashMap;

    fn setup() -> (Registry, Database) {
        let registry = Registry::with_standard_filters().expect("standard filters");
        let db = Database::in_memory().expect("open in-memory db");
        (registry, db)
    }

    #[test]
    fn empty_selection_matches_everything() {
        let (registry, db) = setup();
        let mut filters = FilterSet::new();
        filters
            .add(&registry, &db, "user", 5_i64, false)
            .expect("add user filter");

        let (clause, params) = filters.where_clause(&[]);
        assert_eq!(clause, "1");
        assert!(params.is_empty());
    }

    #[test]
    fn where_clause_joins_selected_filters_in_insertion_order() {
        let (registry, db) = setup();
        let mut filters = FilterSet::new();
        filters
            .add(&registry, &db, "class", 3_i64, false)
            .expect("add class filter");
        filters
            .add(&registry, &db, "user", 5_i64, false)
            .expect("add user filter");

        let (clause, params) = filters.where_clause(&["class", "user"]);
        assert_eq!(clause, "classes.id=? AND users.id=?");
        assert_eq!(params, vec![FilterValue::Int(3), FilterValue::Int(5)]);
    }

    #[test]
    fn unselected_filters_are_excluded() {
        let (registry, db) = setup();
        let mut filters = FilterSet::new();
        filters
            .add(&registry, &db, "class", 3_i64, false)
            .expect("add class filter");
        filters
            .add(&registry, &db, "user", 5_i64, false)
            .expect("add user filter");

        let (clause, params) = filters.where_clause(&["user"]);
        assert_eq!(clause, "users.id=?");
        assert_eq!(params, vec![FilterValue::Int(5)]);
    }

    #[test]
    fn add_rejects_unknown_filter_name() {
        let (registry, db) = setup();
        let mut filters = FilterSet::new();
        let err = filters
            .add(&registry, &db, "nonsense", 1_i64, false)
            .expect_err("unknown name should fail");
        assert!(err.to_string().contains("UNKNOWN_FILTER"));
    }

    #[test]
    fn from_params_ignores_unregistered_names() {
        let (registry, db) = setup();
        let mut params = HashMap::new();
        params.insert("user".to_string(), "5".to_string());
        params.insert("utm_source".to_string(), "newsletter".to_string());

        let filters =
            FilterSet::from_params(&registry, &db, &params, false).expect("build filter set");
        assert_eq!(filters.iter().count(), 1);
        assert_eq!(filters.get("user").unwrap().value, FilterValue::Int(5));
    }

    #[test]
    fn duplicate_dimension_last_write_wins() {
        let (registry, db) = setup();
        let mut filters = FilterSet::new();
        filters
            .add(&registry, &db, "user", 5_i64, false)
            .expect("add first");
        filters
            .add(&registry, &db, "user", 9_i64, false)
            .expect("add replacement");

        assert_eq!(filters.iter().count(), 1);
        let (_, params) = filters.where_clause(&["user"]);
        assert_eq!(params, vec![FilterValue::Int(9)]);
    }

    #[test]
    fn query_string_without_omits_one_dimension() {
        let (registry, db) = setup();
        let mut filters = FilterSet::new();
        filters
            .add(&registry, &db, "user", 5_i64, false)
            .expect("add user");
        filters
            .add(&registry, &db, "class", 3_i64, false)
            .expect("add class");

        let qs = filters.query_string_without("user").expect("query string");
        assert!(qs.contains("class=3"));
        assert!(!qs.contains("user="));
    }

    #[test]
    fn row_link_template_carries_literal_placeholder() {
        let (registry, db) = setup();
        let mut filters = FilterSet::new();
        filters
            .add(&registry, &db, "class", 3_i64, false)
            .expect("add class");

        let template = filters.row_link_template("user").expect("link template");
        assert_eq!(template, "?class=3&user=${value}");
    }

    #[test]
    fn display_resolution_uses_spec_query() {
        let (registry, db) = setup();
        db.execute(
            "INSERT INTO users (id, display_name) VALUES (7, 'Grace Hopper')",
            &[],
        )
        .expect("insert user");

        let mut filters = FilterSet::new();
        filters
            .add(&registry, &db, "user", 7_i64, true)
            .expect("add with display");
        assert_eq!(
            filters.get("user").unwrap().display_value.as_deref(),
            Some("Grace Hopper")
        );
    }

    #[test]
    fn string_values_survive_parse_and_encode() {
        let (registry, db) = setup();
        let mut params = HashMap::new();
        params.insert("consumer".to_string(), "canvas lms".to_string());

        let filters =
            FilterSet::from_params(&registry, &db, &params, false).expect("build filter set");
        assert_eq!(
            filters.get("consumer").unwrap().value,
            FilterValue::Str("canvas lms".to_string())
        );
        assert_eq!(
            filters.query_string().expect("query string"),
            "?consumer=canvas+lms"
        );
    }
}
