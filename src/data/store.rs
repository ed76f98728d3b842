use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use log::{info, warn};

use super::loader;
use super::model::{CoefficientSet, Panel, ReferenceSheet, SplineTable, TableKey};
use crate::config::ReferenceConfig;
use crate::error::{ReferenceError, Result};

// ---------------------------------------------------------------------------
// ReferenceSource – where panel tables come from
// ---------------------------------------------------------------------------

/// Supplies the reference sheets of one panel on demand.
pub trait ReferenceSource: Send + Sync {
    fn load(&self, panel: Panel) -> Result<Vec<ReferenceSheet>>;
}

/// Reads the three configured reference files.
#[derive(Debug, Clone)]
pub struct FileSource {
    config: ReferenceConfig,
}

impl FileSource {
    pub fn new(config: ReferenceConfig) -> Self {
        Self { config }
    }
}

impl ReferenceSource for FileSource {
    fn load(&self, panel: Panel) -> Result<Vec<ReferenceSheet>> {
        let path = self.config.path_for(panel);
        loader::load_file(path, panel).map_err(|e| ReferenceError::load(path, &e))
    }
}

/// Sheets already in memory, grouped by panel.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    sheets: BTreeMap<Panel, Vec<ReferenceSheet>>,
}

impl MemorySource {
    pub fn new(sheets: impl IntoIterator<Item = ReferenceSheet>) -> Self {
        let mut grouped: BTreeMap<Panel, Vec<ReferenceSheet>> = BTreeMap::new();
        for sheet in sheets {
            grouped
                .entry(sheet.key.parameter.panel())
                .or_default()
                .push(sheet);
        }
        Self { sheets: grouped }
    }
}

impl ReferenceSource for MemorySource {
    fn load(&self, panel: Panel) -> Result<Vec<ReferenceSheet>> {
        self.sheets
            .get(&panel)
            .cloned()
            .ok_or_else(|| ReferenceError::Load {
                path: PathBuf::from("<memory>"),
                reason: format!("no {panel} sheets supplied"),
            })
    }
}

// ---------------------------------------------------------------------------
// PanelTables – the resident tables of one panel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PanelTables {
    tables: BTreeMap<TableKey, SplineTable>,
    coefficients: BTreeMap<TableKey, CoefficientSet>,
}

impl PanelTables {
    fn from_sheets(sheets: Vec<ReferenceSheet>) -> Self {
        let mut out = Self::default();
        for sheet in sheets {
            if let Some(c) = sheet.coefficients {
                out.coefficients.insert(sheet.key, c);
            }
            out.tables.insert(sheet.key, sheet.table);
        }
        out
    }

    pub fn table(&self, key: TableKey) -> Option<&SplineTable> {
        self.tables.get(&key)
    }

    pub fn coefficients(&self, key: TableKey) -> Option<CoefficientSet> {
        self.coefficients.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ReferenceStore – lazily loaded, shared, read-only tables
// ---------------------------------------------------------------------------

/// Holds the reference tables of every panel for the life of the store.
///
/// Each panel is loaded from the source the first time it is needed. Loads
/// are serialized by a single guard and a panel is published only once its
/// whole load has succeeded, so concurrent callers either see nothing or the
/// complete set of sheets. A failed load publishes nothing and is retried on
/// the next request.
pub struct ReferenceStore {
    source: Box<dyn ReferenceSource>,
    panels: [OnceLock<PanelTables>; 3],
    load_guard: Mutex<()>,
}

impl ReferenceStore {
    pub fn new(source: impl ReferenceSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            panels: [OnceLock::new(), OnceLock::new(), OnceLock::new()],
            load_guard: Mutex::new(()),
        }
    }

    /// Store reading the files named in `config`.
    pub fn from_config(config: ReferenceConfig) -> Self {
        Self::new(FileSource::new(config))
    }

    /// Store over in-memory sheets.
    pub fn from_sheets(sheets: impl IntoIterator<Item = ReferenceSheet>) -> Self {
        Self::new(MemorySource::new(sheets))
    }

    /// Tables of `panel`, loading them on first use.
    pub fn panel_tables(&self, panel: Panel) -> Result<&PanelTables> {
        let slot = &self.panels[panel.index()];
        if let Some(tables) = slot.get() {
            return Ok(tables);
        }

        let _guard = self.load_guard.lock().map_err(|_| ReferenceError::Poisoned)?;
        // Another caller may have finished the load while we waited.
        if let Some(tables) = slot.get() {
            return Ok(tables);
        }

        let sheets = self.source.load(panel).inspect_err(|e| {
            warn!("Could not load {panel} reference tables: {e}");
        })?;
        let tables = PanelTables::from_sheets(sheets);
        info!("Loaded {} {panel} reference sheets", tables.len());
        Ok(slot.get_or_init(|| tables))
    }

    /// Load every panel now. Returns the first failure, if any; panels that
    /// did load stay resident.
    pub fn preload(&self) -> Result<()> {
        let mut first_err = None;
        for panel in Panel::ALL {
            if let Err(e) = self.panel_tables(panel) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_loaded(&self, panel: Panel) -> bool {
        self.panels[panel.index()].get().is_some()
    }

    /// Nearest-age spline correction for `key`.
    pub fn spline(&self, key: TableKey, age: f64) -> Result<f64> {
        let tables = self.panel_tables(key.parameter.panel())?;
        tables
            .table(key)
            .map(|t| t.nearest_spline(age))
            .ok_or(ReferenceError::MissingTable(key))
    }

    /// Coefficient block embedded in the sheet for `key`, if the source had one.
    pub fn embedded_coefficients(&self, key: TableKey) -> Result<Option<CoefficientSet>> {
        Ok(self
            .panel_tables(key.parameter.panel())?
            .coefficients(key))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::data::model::{Parameter, ReferencePoint, Sex};

    /// Counts loads and fails the first `fail_first` of them.
    struct CountingSource {
        inner: MemorySource,
        loads: Arc<AtomicUsize>,
        fail_first: usize,
    }

    impl ReferenceSource for CountingSource {
        fn load(&self, panel: Panel) -> Result<Vec<ReferenceSheet>> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ReferenceError::Load {
                    path: PathBuf::from("flaky"),
                    reason: "not yet".into(),
                });
            }
            self.inner.load(panel)
        }
    }

    fn volume_sheets() -> Vec<ReferenceSheet> {
        Panel::Volumes
            .required_keys()
            .map(|key| ReferenceSheet {
                key,
                table: SplineTable::new(vec![
                    ReferencePoint { age: 10.0, spline: 0.1 },
                    ReferencePoint { age: 20.0, spline: 0.2 },
                ])
                .unwrap(),
                coefficients: None,
            })
            .collect()
    }

    fn counting(fail_first: usize) -> (ReferenceStore, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let store = ReferenceStore::new(CountingSource {
            inner: MemorySource::new(volume_sheets()),
            loads: Arc::clone(&loads),
            fail_first,
        });
        (store, loads)
    }

    #[test]
    fn loads_lazily_and_only_once() {
        let (store, loads) = counting(0);
        assert!(!store.is_loaded(Panel::Volumes));
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        let key = TableKey::new(Parameter::Tlc, Sex::Male);
        for _ in 0..5 {
            assert_eq!(store.spline(key, 19.0).unwrap(), 0.2);
        }
        assert!(store.is_loaded(Panel::Volumes));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_load_publishes_nothing_and_retries() {
        let (store, loads) = counting(1);
        let key = TableKey::new(Parameter::Rv, Sex::Female);

        assert!(matches!(store.spline(key, 10.0), Err(ReferenceError::Load { .. })));
        assert!(!store.is_loaded(Panel::Volumes));

        assert_eq!(store.spline(key, 10.0).unwrap(), 0.1);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_use_loads_once() {
        let (store, loads) = counting(0);
        let store = Arc::new(store);
        let key = TableKey::new(Parameter::Vc, Sex::Male);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.spline(key, 12.0).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 0.1);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_panel_is_a_load_error() {
        let store = ReferenceStore::from_sheets(volume_sheets());
        let key = TableKey::new(Parameter::Dlco, Sex::Male);
        assert!(matches!(store.spline(key, 40.0), Err(ReferenceError::Load { .. })));
        assert!(store.preload().is_err());
        // Volumes still loaded despite the other failures.
        assert!(store.is_loaded(Panel::Volumes));
    }

    #[test]
    fn missing_sheet_in_loaded_panel() {
        let sheets: Vec<_> = volume_sheets()
            .into_iter()
            .filter(|s| s.key.parameter != Parameter::RvTlc)
            .collect();
        let store = ReferenceStore::from_sheets(sheets);
        let key = TableKey::new(Parameter::RvTlc, Sex::Male);
        assert!(matches!(store.spline(key, 40.0), Err(ReferenceError::MissingTable(k)) if k == key));
    }

    #[test]
    fn file_source_reports_path_on_failure() {
        let config = ReferenceConfig {
            volumes: PathBuf::from("/nonexistent/lookuptablesvol.csv"),
            ..ReferenceConfig::default()
        };
        let store = ReferenceStore::from_config(config);
        match store.panel_tables(Panel::Volumes) {
            Err(ReferenceError::Load { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/lookuptablesvol.csv"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a load failure"),
        }
    }
}
