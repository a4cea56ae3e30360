//! Retrieval of spectral DataSets from neutron-instrument data files and
//! live acquisition servers.
//!
//! [`retriever::open_retriever`] picks a decoder or remote client from a
//! source string; [`live::LiveDataManager`] keeps a polled copy of a live
//! server's DataSets.

pub mod config;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod formats;
pub mod live;
pub mod remote;
pub mod retriever;
pub mod source;

pub use config::RetrievalConfig;
pub use data::model::{AttributeValue, DataSet, Spectrum, XScale};
pub use diagnostics::{DiagnosticSink, LogSink, MemorySink};
pub use error::RetrieveError;
pub use retriever::{open_retriever, AnyRetriever, DataSetInfo, DataSetType, Retriever};
pub use source::RetrievalSource;
