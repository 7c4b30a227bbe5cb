/// Data layer: core types, loading, label matching and persistence.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv  (one file or a directory)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse files → RawSpectrum, collate → Dataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  Dataset  │  targets, WavelengthGrid, flux, ivar, labels
///   └──────────┘
///        │
///        ├────────────────────┐
///        ▼                    ▼
///   ┌──────────┐        ┌──────────┐
///   │ matching  │        │  store    │  Dataset ↔ Parquet
///   └──────────┘        └──────────┘
///   id prefix → labels
/// ```

pub mod loader;
pub mod matching;
pub mod model;
pub mod store;
