use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Instrument families known to the decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentType {
    TofDiffractometer,
    TofScd,
    TofSad,
    TofDgSpectrometer,
    TofIdgSpectrometer,
    TofReflectometer,
    Unknown,
}

impl InstrumentType {
    /// Classify an IPNS-style run file from its name prefix, e.g.
    /// `hrcs2447.run` is a direct-geometry spectrometer.
    pub fn from_file_name(name: &str) -> Self {
        let prefix = instrument_name(name);
        match prefix.as_str() {
            "hrcs" | "lrcs" => InstrumentType::TofDgSpectrometer,
            "gppd" | "sepd" | "glad" | "hipd" => InstrumentType::TofDiffractometer,
            "scd" | "sxd" => InstrumentType::TofScd,
            "sad" | "sand" => InstrumentType::TofSad,
            "chex" | "qens" => InstrumentType::TofIdgSpectrometer,
            "posy" | "pne" => InstrumentType::TofReflectometer,
            _ => InstrumentType::Unknown,
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstrumentType::TofDiffractometer => "TOF_DIFFRACTOMETER",
            InstrumentType::TofScd => "TOF_SCD",
            InstrumentType::TofSad => "TOF_SAD",
            InstrumentType::TofDgSpectrometer => "TOF_DG_SPECTROMETER",
            InstrumentType::TofIdgSpectrometer => "TOF_IDG_SPECTROMETER",
            InstrumentType::TofReflectometer => "TOF_REFLECTOMETER",
            InstrumentType::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// File name without directory or extension.
pub fn base_file_name(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string()
}

/// Leading alphabetic part of the base file name, lower-cased.
pub fn instrument_name(name: &str) -> String {
    base_file_name(name)
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase()
}
