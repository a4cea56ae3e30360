/// Data layer: core types and DataSet assembly.
///
/// Architecture:
/// ```text
///  .gsa / .run / .csv / .parquet / TCP
///        │
///        ▼
///   ┌──────────┐
///   │ formats  │  decode → Vec<RawSpectrum>  (spectrum + unit tags)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ assemble │  group by monitor flag / units → Vec<DataSet>
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  model   │  DataSet, Spectrum, XScale, attributes
///   └──────────┘
/// ```

pub mod assemble;
pub mod attr;
pub mod instrument;
pub mod model;
