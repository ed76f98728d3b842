/// Data layer: reference types, loading, and the resident table store.
///
/// Architecture:
/// ```text
///  .parquet / .csv / .json  (one file per panel)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Vec<ReferenceSheet>
///   └──────────┘
///        │
///        ▼
///   ┌───────────────┐
///   │ ReferenceStore │  lazy, load-once per panel; nearest-age spline lookup
///   └───────────────┘
///        │
///        ▼
///   equations::evaluator
/// ```

pub mod loader;
pub mod model;
pub mod store;
