/// File decoders. Each turns one file into raw spectra and hands them to
/// [`crate::data::assemble`].
///
/// ```text
///   .gsa/.gda ──► gsas      ──┐
///   .prm      ──► calibration ┤ (attributes only)
///   .run      ──► runfile   ──┼──► DataSets
///   .csv/.pq  ──► columnar  ──┘
/// ```

pub mod calibration;
pub mod columnar;
pub mod gsas;
pub mod runfile;
