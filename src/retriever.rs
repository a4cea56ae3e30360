//! The retriever contract shared by every data source.
//!
//! ```text
//!   source string ──► open_retriever ──► AnyRetriever
//!                                          ├─ Gsas        (text file)
//!                                          ├─ Runfile     (binary run file)
//!                                          ├─ ColumnLog   (csv / parquet)
//!                                          ├─ RemoteFile  (TCP, named file)
//!                                          └─ Live        (TCP, live data)
//! ```
//!
//! `num_data_sets` may answer a negative status code instead of a count;
//! check the sign (or use [`checked_count`]) before indexing.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::data::model::DataSet;
use crate::diagnostics::DiagnosticSink;
use crate::error::RetrieveError;
use crate::formats::columnar::ColumnLogRetriever;
use crate::formats::gsas::GsasRetriever;
use crate::formats::runfile::RunfileRetriever;
use crate::remote::retriever::{LiveRetriever, RemoteFileRetriever};
use crate::source::RetrievalSource;

// ---------------------------------------------------------------------------
// DataSet classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSetType {
    Monitor,
    Histogram,
    PulseHeight,
    Invalid,
}

/// Pre-flight description of a DataSet, cheaper than fetching it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSetInfo {
    pub title: String,
    pub data_set_type: DataSetType,
    pub num_spectra: usize,
    pub x_units: String,
    pub x_range: Option<(f64, f64)>,
}

impl DataSetInfo {
    pub fn describe(ds: &DataSet, data_set_type: DataSetType) -> Self {
        DataSetInfo {
            title: ds.title.clone(),
            data_set_type,
            num_spectra: ds.len(),
            x_units: ds.x_units.clone(),
            x_range: ds.x_range(),
        }
    }
}

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

/// Negative codes answered by `num_data_sets` in place of a count.
pub mod status {
    pub const BAD_FILE_NAME: i32 = -1;
    pub const BAD_USER_NAME: i32 = -2;
    pub const BAD_PASSWORD: i32 = -3;
    pub const SERVER_DOWN: i32 = -4;
    pub const WRONG_SERVER_TYPE: i32 = -5;
    pub const DATA_OLD: i32 = -6;
    pub const DATA_LIVE: i32 = -7;
    pub const DAS_OFFLINE: i32 = -8;
    pub const NOT_CONNECTED: i32 = -9;
    pub const NO_DATA_MANAGER: i32 = -10;
    pub const NO_CONNECTION: i32 = -11;

    pub const SERVER_OK: &str = "Server OK";

    const MESSAGES: [&str; 12] = [
        "No DataSets: ",
        "File Not Found",
        "User Not Found",
        "Wrong Password",
        "Server Down",
        "Wrong Server Type",
        "Data OLD: ",
        "Data Live: ",
        "DAS STOPPED: ",
        "NOT Connected",
        "No Data Manager",
        "No Connection",
    ];

    /// Human-readable text for a count or status code.
    pub fn message(code: i32) -> String {
        if code > 0 {
            return SERVER_OK.to_string();
        }
        match MESSAGES.get(code.unsigned_abs() as usize) {
            Some(text) => text.to_string(),
            None => format!("Server Error: {code}"),
        }
    }
}

/// Turn a `num_data_sets` answer into a usable count.
pub fn checked_count(code: i32) -> Result<usize, RetrieveError> {
    if code < 0 {
        Err(RetrieveError::from_status(code))
    } else {
        Ok(code as usize)
    }
}

/// Check `index` against a `num_data_sets` answer.
pub fn checked_index(index: usize, code: i32) -> Result<usize, RetrieveError> {
    let count = checked_count(code)?;
    if index < count {
        Ok(index)
    } else {
        Err(RetrieveError::IndexOutOfRange { index, count })
    }
}

// ---------------------------------------------------------------------------
// Retriever trait
// ---------------------------------------------------------------------------

/// Random access to the DataSets of one data source.
///
/// An index outside `0..num_data_sets()` answers [`DataSetType::Invalid`]
/// and `None`; no method panics or returns an error.
pub trait Retriever: Send {
    fn data_source_name(&self) -> &str;

    /// Number of DataSets, or a negative [`status`] code.
    fn num_data_sets(&mut self) -> i32;

    fn get_type(&mut self, index: usize) -> DataSetType;

    fn get_data_set(&mut self, index: usize) -> Option<DataSet>;

    fn data_set_info(&mut self, index: usize) -> Option<DataSetInfo> {
        let ty = self.get_type(index);
        self.get_data_set(index)
            .map(|ds| DataSetInfo::describe(&ds, ty))
    }

    fn error_message(&mut self) -> String {
        status::message(self.num_data_sets())
    }

    /// First DataSet of the requested type, monitor or histogram only.
    fn first_data_set(&mut self, wanted: DataSetType) -> Option<DataSet> {
        if wanted != DataSetType::Monitor && wanted != DataSetType::Histogram {
            return None;
        }
        let count = checked_count(self.num_data_sets()).ok()?;
        let index = (0..count).find(|&i| self.get_type(i) == wanted)?;
        self.get_data_set(index)
    }
}

// ---------------------------------------------------------------------------
// Construction-time dispatch
// ---------------------------------------------------------------------------

/// Every concrete retriever, selected once from the source string.
pub enum AnyRetriever {
    Gsas(GsasRetriever),
    Runfile(RunfileRetriever),
    ColumnLog(ColumnLogRetriever),
    RemoteFile(RemoteFileRetriever),
    Live(LiveRetriever),
}

impl AnyRetriever {
    fn inner(&mut self) -> &mut dyn Retriever {
        match self {
            AnyRetriever::Gsas(r) => r,
            AnyRetriever::Runfile(r) => r,
            AnyRetriever::ColumnLog(r) => r,
            AnyRetriever::RemoteFile(r) => r,
            AnyRetriever::Live(r) => r,
        }
    }
}

impl Retriever for AnyRetriever {
    fn data_source_name(&self) -> &str {
        match self {
            AnyRetriever::Gsas(r) => r.data_source_name(),
            AnyRetriever::Runfile(r) => r.data_source_name(),
            AnyRetriever::ColumnLog(r) => r.data_source_name(),
            AnyRetriever::RemoteFile(r) => r.data_source_name(),
            AnyRetriever::Live(r) => r.data_source_name(),
        }
    }

    fn num_data_sets(&mut self) -> i32 {
        self.inner().num_data_sets()
    }

    fn get_type(&mut self, index: usize) -> DataSetType {
        self.inner().get_type(index)
    }

    fn get_data_set(&mut self, index: usize) -> Option<DataSet> {
        self.inner().get_data_set(index)
    }

    fn data_set_info(&mut self, index: usize) -> Option<DataSetInfo> {
        self.inner().data_set_info(index)
    }

    fn error_message(&mut self) -> String {
        self.inner().error_message()
    }
}

/// Which retriever a source string selects, without opening anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Gsas,
    Runfile,
    ColumnLog,
    RemoteFile,
    Live,
}

pub fn classify_source(name: &str) -> Result<SourceKind, RetrieveError> {
    if name.contains(';') {
        let source = RetrievalSource::parse(name)?;
        return Ok(if source.file.is_some() {
            SourceKind::RemoteFile
        } else {
            SourceKind::Live
        });
    }
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "gsa" | "gda" | "gsas" | "gss" | "raw" => Ok(SourceKind::Gsas),
        "run" => Ok(SourceKind::Runfile),
        "csv" | "parquet" | "pq" => Ok(SourceKind::ColumnLog),
        other => Err(RetrieveError::MalformedSource(format!(
            "no retriever for extension .{other}"
        ))),
    }
}

/// Open the retriever appropriate for `name`.
pub fn open_retriever(
    name: &str,
    config: &RetrievalConfig,
    sink: Arc<dyn DiagnosticSink>,
) -> Result<AnyRetriever, RetrieveError> {
    let retriever = match classify_source(name)? {
        SourceKind::Gsas => AnyRetriever::Gsas(GsasRetriever::open(name, sink)),
        SourceKind::Runfile => AnyRetriever::Runfile(RunfileRetriever::open(name, sink)),
        SourceKind::ColumnLog => AnyRetriever::ColumnLog(ColumnLogRetriever::open(name, sink)),
        SourceKind::RemoteFile => {
            AnyRetriever::RemoteFile(RemoteFileRetriever::connect(name, config)?)
        }
        SourceKind::Live => AnyRetriever::Live(LiveRetriever::connect(name, config)?),
    };
    Ok(retriever)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_messages_follow_the_table() {
        assert_eq!(status::message(3), "Server OK");
        assert_eq!(status::message(0), "No DataSets: ");
        assert_eq!(status::message(status::BAD_PASSWORD), "Wrong Password");
        assert_eq!(status::message(status::NO_CONNECTION), "No Connection");
        assert_eq!(status::message(-40), "Server Error: -40");
    }

    #[test]
    fn checked_count_rejects_sentinels() {
        assert_eq!(checked_count(4).unwrap(), 4);
        assert!(checked_count(status::SERVER_DOWN).is_err());
    }

    #[test]
    fn checked_index_reports_the_roster_size() {
        assert_eq!(checked_index(2, 3).unwrap(), 2);
        let err = checked_index(3, 3).unwrap_err();
        assert!(matches!(err, RetrieveError::IndexOutOfRange { index: 3, count: 3 }));
        assert_eq!(err.status_code(), status::BAD_FILE_NAME);
        assert_eq!(err.to_string(), "index 3 out of range for 3 DataSets");
        assert!(matches!(
            checked_index(0, status::DAS_OFFLINE),
            Err(RetrieveError::Status(status::DAS_OFFLINE))
        ));
    }

    #[test]
    fn classifies_sources() {
        assert_eq!(classify_source("a/sepd18805.gsa").unwrap(), SourceKind::Gsas);
        assert_eq!(classify_source("HRCS2447.RUN").unwrap(), SourceKind::Runfile);
        assert_eq!(classify_source("temps.parquet").unwrap(), SourceKind::ColumnLog);
        assert_eq!(
            classify_source("host;6088;me;pw;/data/run.run").unwrap(),
            SourceKind::RemoteFile
        );
        assert_eq!(classify_source("host;6088;me;pw;").unwrap(), SourceKind::Live);
        assert!(classify_source("notes.txt").is_err());
    }
}
