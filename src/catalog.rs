//! Canonical dimension values cached from the store.
//!
//! Single writer, many readers: `refresh()` loads every registered
//! dimension under one read transaction, builds a complete snapshot, and
//! swaps it in atomically. Readers clone the current `Arc` and keep using
//! the previous snapshot while a refresh is in flight, so resolution never
//! observes a half-updated catalog. No time-based expiry; stale-but-
//! consistent beats partially-fresh.

use crate::error::{PayscopeError, Result};
use crate::store::Store;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Registered dimensions: (dimension name, backing column in
/// `job_positions`). Query construction only ever touches columns named
/// here.
const DIMENSIONS: &[(&str, &str)] = &[
    ("job_function", "job_function"),
    ("job_level", "job_level"),
];

/// Backing column for a dimension name.
pub fn dimension_column(dimension: &str) -> Result<&'static str> {
    DIMENSIONS
        .iter()
        .find(|(name, _)| *name == dimension)
        .map(|(_, column)| *column)
        .ok_or_else(|| PayscopeError::UnknownDimension(dimension.to_string()))
}

/// Names of all registered dimensions, in registration order.
pub fn dimension_names() -> impl Iterator<Item = &'static str> {
    DIMENSIONS.iter().map(|(name, _)| *name)
}

/// Immutable view of all dimension values as of one refresh.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    /// Canonical values per dimension, alphabetical.
    values: HashMap<String, Vec<String>>,
    /// Lowercased value -> canonical spelling, per dimension.
    lower: HashMap<String, HashMap<String, String>>,
}

impl CatalogSnapshot {
    fn from_values(values: HashMap<String, Vec<String>>) -> Self {
        let lower = values
            .iter()
            .map(|(dimension, vals)| {
                let index = vals
                    .iter()
                    .map(|v| (v.to_lowercase(), v.clone()))
                    .collect();
                (dimension.clone(), index)
            })
            .collect();
        Self { values, lower }
    }

    /// Canonical values of a dimension. Empty before the first refresh.
    pub fn values(&self, dimension: &str) -> &[String] {
        self.values
            .get(dimension)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Case-insensitive exact lookup, returning the canonical spelling.
    pub fn lookup_exact(&self, dimension: &str, fragment: &str) -> Option<&str> {
        self.lower
            .get(dimension)?
            .get(&fragment.trim().to_lowercase())
            .map(|s| s.as_str())
    }
}

/// Cache of canonical dimension values, refreshed explicitly.
pub struct DimensionCatalog {
    store: Store,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
}

impl DimensionCatalog {
    /// Create an empty catalog. Call `refresh()` before resolving.
    pub fn new(store: Store) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
        }
    }

    /// Reload every registered dimension from the store and swap the
    /// snapshot in one step.
    pub fn refresh(&self) -> Result<()> {
        let columns: Vec<&str> = DIMENSIONS.iter().map(|(_, column)| *column).collect();
        let raw = self.store.distinct_values_snapshot(&columns)?;

        let mut values = HashMap::new();
        for (name, column) in DIMENSIONS {
            values.insert(
                (*name).to_string(),
                raw.get(*column).cloned().unwrap_or_default(),
            );
        }

        let next = Arc::new(CatalogSnapshot::from_values(values));
        let loaded: usize = next.values.values().map(|v| v.len()).sum();

        *self.snapshot.write().unwrap() = next;

        info!("Dimension catalog refreshed: {} values across {} dimensions", loaded, DIMENSIONS.len());
        Ok(())
    }

    /// Current snapshot. Cheap to clone and safe to hold across a refresh.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// Canonical values for `dimension`. `UnknownDimension` if the
    /// dimension is not registered.
    pub fn get_values(&self, dimension: &str) -> Result<Vec<String>> {
        dimension_column(dimension)?;
        Ok(self.snapshot().values(dimension).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CompRecord;

    fn seeded_catalog(tag: &str) -> DimensionCatalog {
        let path = std::env::temp_dir().join(format!("payscope_catalog_{}_{}.db", tag, uuid::Uuid::new_v4()));
        let store = Store::new(&path);
        store.create_schema().unwrap();
        store
            .insert_records(&[
                CompRecord {
                    function: "Engineering".to_string(),
                    level: "Entry (P1)".to_string(),
                    p10: None,
                    p25: None,
                    p50: Some(100_000.0),
                    p75: None,
                    p90: None,
                    emp_count: Some(5),
                },
                CompRecord {
                    function: "Creative".to_string(),
                    level: "Career (P3)".to_string(),
                    p10: None,
                    p25: None,
                    p50: Some(90_000.0),
                    p75: None,
                    p90: None,
                    emp_count: Some(3),
                },
            ])
            .unwrap();
        let catalog = DimensionCatalog::new(store);
        catalog.refresh().unwrap();
        catalog
    }

    #[test]
    fn test_get_values_after_refresh() {
        let catalog = seeded_catalog("values");
        let functions = catalog.get_values("job_function").unwrap();
        assert_eq!(functions, vec!["Creative".to_string(), "Engineering".to_string()]);
    }

    #[test]
    fn test_unknown_dimension_is_an_error() {
        let catalog = seeded_catalog("unknown");
        let err = catalog.get_values("department").unwrap_err();
        assert!(matches!(err, PayscopeError::UnknownDimension(_)));
    }

    #[test]
    fn test_lookup_exact_is_case_insensitive() {
        let catalog = seeded_catalog("lookup");
        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.lookup_exact("job_function", "creative"), Some("Creative"));
        assert_eq!(snapshot.lookup_exact("job_function", "CREATIVE"), Some("Creative"));
        assert_eq!(snapshot.lookup_exact("job_function", "  Creative "), Some("Creative"));
        assert_eq!(snapshot.lookup_exact("job_function", "Creativz"), None);
    }

    #[test]
    fn test_reader_keeps_previous_snapshot_across_refresh() {
        let catalog = seeded_catalog("snapshot");
        let before = catalog.snapshot();
        catalog.refresh().unwrap();
        // The old snapshot stays valid and unchanged for holders.
        assert_eq!(before.values("job_function").len(), 2);
        assert!(!Arc::ptr_eq(&before, &catalog.snapshot()));
    }

    #[test]
    fn test_empty_before_refresh() {
        let path = std::env::temp_dir().join(format!("payscope_catalog_empty_{}.db", uuid::Uuid::new_v4()));
        let store = Store::new(&path);
        store.create_schema().unwrap();
        let catalog = DimensionCatalog::new(store);
        assert!(catalog.get_values("job_function").unwrap().is_empty());
    }
}
