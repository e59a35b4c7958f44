use crate::db::{DataRow, Database};
use crate::errors::{AppError, AppResult};
use crate::filters::{FilterSet, FilterSpec, FilterValue};
use crate::tables::DataTable;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Dataset for one chart on the admin dashboard. `labels` and every series
/// must have the same length; mismatches are a bug in the generator.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ChartData {
    pub labels: Vec<serde_json::Value>,
    pub series: BTreeMap<String, Vec<f64>>,
    pub colors: Vec<String>,
}

impl ChartData {
    pub fn new(
        labels: Vec<serde_json::Value>,
        series: BTreeMap<String, Vec<f64>>,
        colors: Vec<String>,
    ) -> Self {
        for values in series.values() {
            debug_assert_eq!(values.len(), labels.len(), "series length must match labels");
        }
        Self {
            labels,
            series,
            colors,
        }
    }
}

/// A registered data-source fetch: filter set plus pagination bounds in,
/// generic rows out. `limit` of -1 means unbounded, mirroring SQLite.
pub type FetchFn = Arc<dyn Fn(&Database, &FilterSet, i64, i64) -> AppResult<Vec<DataRow>> + Send + Sync>;

/// A registered chart generator, invoked with an already-composed WHERE
/// fragment and its bound parameters so every chart on a page is scoped to the
/// same filter selection.
pub type ChartFn = Arc<dyn Fn(&Database, &str, &[FilterValue]) -> AppResult<Vec<ChartData>> + Send + Sync>;

struct DataSourceEntry {
    fetch: FetchFn,
    table: DataTable,
}

/// Process-wide registration state: filter dimensions, named data sources, and
/// admin chart generators.
///
/// Built once during single-threaded startup, then shared read-only (behind an
/// `Arc` in the router state) for the life of the process. Tests construct a
/// fresh registry per case instead of relying on ambient globals.
#[derive(Default)]
pub struct Registry {
    filter_specs: Vec<Arc<FilterSpec>>,
    sources: BTreeMap<String, DataSourceEntry>,
    charts: Vec<ChartFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-seeded with the standard filter dimensions every
    /// deployment of the app understands.
    pub fn with_standard_filters() -> AppResult<Self> {
        let mut registry = Self::new();
        registry.register_filter(FilterSpec::new(
            "consumer",
            "consumers.id",
            Some("SELECT lti_consumer FROM consumers WHERE id=?"),
        ))?;
        registry.register_filter(FilterSpec::new(
            "class",
            "classes.id",
            Some("SELECT name FROM classes WHERE id=?"),
        ))?;
        registry.register_filter(FilterSpec::new(
            "user",
            "users.id",
            Some("SELECT display_name FROM users WHERE id=?"),
        ))?;
        registry.register_filter(FilterSpec::new(
            "role",
            "roles.id",
            Some(
                "SELECT printf('%s (%s:%s)', users.display_name, role_class.name, roles.role)
                 FROM roles
                 LEFT JOIN users ON users.id=roles.user_id
                 LEFT JOIN classes AS role_class ON role_class.id=roles.class_id
                 WHERE roles.id=?",
            ),
        ))?;
        registry.register_filter(FilterSpec::new("query", "queries.id", None))?;
        Ok(registry)
    }

    pub fn register_filter(&mut self, spec: FilterSpec) -> AppResult<()> {
        if self.filter_specs.iter().any(|s| s.name == spec.name) {
            return Err(AppError::DuplicateRegistration(format!(
                "filter spec already registered: {}",
                spec.name
            )));
        }
        self.filter_specs.push(Arc::new(spec));
        Ok(())
    }

    pub fn filter_spec(&self, name: &str) -> AppResult<Arc<FilterSpec>> {
        self.filter_specs
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| AppError::UnknownFilter(name.to_string()))
    }

    pub fn filter_specs(&self) -> impl Iterator<Item = Arc<FilterSpec>> + '_ {
        self.filter_specs.iter().cloned()
    }

    /// Register a named data source with its table descriptor.
    ///
    /// Registering the same name again with the identical fetch function and
    /// table is tolerated (re-initialization across tests or app variants);
    /// the same name with different behavior fails fast rather than silently
    /// overwriting a source someone is already reporting from.
    pub fn register_source(&mut self, name: &str, fetch: FetchFn, table: DataTable) -> AppResult<()> {
        if let Some(existing) = self.sources.get(name) {
            if Arc::ptr_eq(&existing.fetch, &fetch) && existing.table == table {
                return Ok(());
            }
            return Err(AppError::DuplicateRegistration(format!(
                "data source already registered with different behavior: {}",
                name
            )));
        }
        self.sources
            .insert(name.to_string(), DataSourceEntry { fetch, table });
        Ok(())
    }

    pub fn source(&self, name: &str) -> AppResult<FetchFn> {
        self.sources
            .get(name)
            .map(|entry| entry.fetch.clone())
            .ok_or_else(|| AppError::UnknownDataSource(name.to_string()))
    }

    pub fn table(&self, name: &str) -> AppResult<DataTable> {
        self.sources
            .get(name)
            .map(|entry| entry.table.clone())
            .ok_or_else(|| AppError::UnknownDataSource(name.to_string()))
    }

    pub fn sources(&self) -> BTreeMap<String, FetchFn> {
        self.sources
            .iter()
            .map(|(name, entry)| (name.clone(), entry.fetch.clone()))
            .collect()
    }

    pub fn tables(&self) -> BTreeMap<String, DataTable> {
        self.sources
            .iter()
            .map(|(name, entry)| (name.clone(), entry.table.clone()))
            .collect()
    }

    /// Charts are append-only; multiple feature modules may each contribute.
    pub fn register_chart(&mut self, generator: ChartFn) {
        self.charts.push(generator);
    }

    pub fn charts(&self) -> &[ChartFn] {
        &self.charts
    }
}

#[cfg(test)]
mod tests {
    use super::{FetchFn, Registry};
    use crate::filters::FilterSpec;
    use crate::tables::DataTable;
    use std::sync::Arc;

    fn noop_fetch() -> FetchFn {
        Arc::new(|_db, _filters, _limit, _offset| Ok(Vec::new()))
    }

    #[test]
    fn lookup_returns_registered_spec() {
        let registry = Registry::with_standard_filters().expect("standard filters");
        let spec = registry.filter_spec("user").expect("user spec");
        assert_eq!(spec.column, "users.id");
    }

    #[test]
    fn lookup_fails_for_unregistered_spec() {
        let registry = Registry::with_standard_filters().expect("standard filters");
        let err = registry.filter_spec("nope").expect_err("unknown spec");
        assert!(err.to_string().contains("UNKNOWN_FILTER"));
    }

    #[test]
    fn duplicate_filter_name_is_rejected() {
        let mut registry = Registry::with_standard_filters().expect("standard filters");
        let err = registry
            .register_filter(FilterSpec::new("user", "users.id", None))
            .expect_err("duplicate name");
        assert!(err.to_string().contains("DUPLICATE_REGISTRATION"));
    }

    #[test]
    fn identical_source_reregistration_is_idempotent() {
        let mut registry = Registry::new();
        let fetch = noop_fetch();
        let table = DataTable::new("things", &["id", "name"]);

        registry
            .register_source("things", fetch.clone(), table.clone())
            .expect("first registration");
        registry
            .register_source("things", fetch, table)
            .expect("identical re-registration");
    }

    #[test]
    fn conflicting_source_reregistration_fails() {
        let mut registry = Registry::new();
        let table = DataTable::new("things", &["id", "name"]);

        registry
            .register_source("things", noop_fetch(), table.clone())
            .expect("first registration");
        let err = registry
            .register_source("things", noop_fetch(), table)
            .expect_err("different fetch must conflict");
        assert!(err.to_string().contains("DUPLICATE_REGISTRATION"));
    }

    #[test]
    fn unknown_source_lookup_fails() {
        let registry = Registry::new();
        let err = match registry.source("missing") {
            Ok(_) => panic!("unknown source"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("UNKNOWN_DATA_SOURCE"));
    }
}
