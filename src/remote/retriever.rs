use log::warn;

use super::client::ProtocolClient;
use super::protocol::{Command, Message};
use crate::config::RetrievalConfig;
use crate::data::model::DataSet;
use crate::error::RetrieveError;
use crate::live::LiveSource;
use crate::retriever::{status, DataSetInfo, DataSetType, Retriever};
use crate::source::RetrievalSource;

/// Typed wrappers over the request/reply calls both retrievers make.
struct Remote {
    name: String,
    client: ProtocolClient,
}

impl Remote {
    fn open(name: &str, config: &RetrievalConfig) -> Result<(Self, RetrievalSource), RetrieveError> {
        let source = RetrievalSource::parse(name)?;
        let mut client = ProtocolClient::new(&source, config)?;
        if let Err(e) = client.connect() {
            warn!("{name}: {e}");
        }
        Ok((
            Remote {
                name: name.to_string(),
                client,
            },
            source,
        ))
    }

    fn count(&mut self, file: &str) -> i32 {
        match self.client.request(Command::Count { file: file.to_string() }) {
            Ok(Message::Count(n)) => n.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
            Ok(Message::NotOk(reason)) => {
                warn!("{}: count refused: {reason}", self.name);
                status::BAD_FILE_NAME
            }
            Ok(other) => {
                warn!("{}: count answered with {}", self.name, other.kind());
                status::WRONG_SERVER_TYPE
            }
            Err(e) => e.status_code(),
        }
    }

    fn types(&mut self, file: &str) -> Option<Vec<DataSetType>> {
        match self.client.request(Command::Types { file: file.to_string() }) {
            Ok(Message::Types(types)) => Some(types),
            _ => None,
        }
    }

    fn fetch(&mut self, command: Command) -> Option<DataSet> {
        match self.client.request(command) {
            Ok(Message::DataSet(ds)) => Some(*ds),
            Ok(Message::NotOk(reason)) => {
                warn!("{}: {reason}", self.name);
                None
            }
            _ => None,
        }
    }

    fn info(&mut self, file: &str, index: usize) -> Option<DataSetInfo> {
        match self.client.request(Command::Info { file: file.to_string(), index }) {
            Ok(Message::Info(info)) => Some(info),
            _ => None,
        }
    }

    fn text(&mut self, command: Command) -> Result<String, i32> {
        match self.client.request(command) {
            Ok(Message::Text(text)) => Ok(text),
            Ok(_) => Err(status::WRONG_SERVER_TYPE),
            Err(e) => Err(e.status_code()),
        }
    }
}

// ---------------------------------------------------------------------------
// Named file on a remote server
// ---------------------------------------------------------------------------

/// DataSets of one file held by a remote data server.
pub struct RemoteFileRetriever {
    remote: Remote,
    file: String,
    types: Option<Vec<DataSetType>>,
}

impl RemoteFileRetriever {
    pub fn connect(name: &str, config: &RetrievalConfig) -> Result<Self, RetrieveError> {
        let (remote, source) = Remote::open(name, config)?;
        let file = source
            .file
            .ok_or_else(|| RetrieveError::MalformedSource(format!("no file in '{name}'")))?;
        Ok(RemoteFileRetriever {
            remote,
            file,
            types: None,
        })
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.remote.client
    }
}

impl Retriever for RemoteFileRetriever {
    fn data_source_name(&self) -> &str {
        &self.remote.name
    }

    fn num_data_sets(&mut self) -> i32 {
        self.remote.count(&self.file)
    }

    fn get_type(&mut self, index: usize) -> DataSetType {
        if self.types.is_none() {
            self.types = self.remote.types(&self.file);
        }
        self.types
            .as_ref()
            .and_then(|t| t.get(index).copied())
            .unwrap_or(DataSetType::Invalid)
    }

    fn get_data_set(&mut self, index: usize) -> Option<DataSet> {
        self.remote.fetch(Command::DataSet {
            file: self.file.clone(),
            index,
        })
    }

    fn data_set_info(&mut self, index: usize) -> Option<DataSetInfo> {
        self.remote.info(&self.file, index)
    }
}

// ---------------------------------------------------------------------------
// Live data on an acquisition server
// ---------------------------------------------------------------------------

/// The DataSets an acquisition server is currently collecting. Only the
/// type list is cached, and every `num_data_sets` call drops it since the
/// roster may change between calls.
pub struct LiveRetriever {
    remote: Remote,
    types: Option<Vec<DataSetType>>,
}

impl LiveRetriever {
    pub fn connect(name: &str, config: &RetrievalConfig) -> Result<Self, RetrieveError> {
        let (remote, _) = Remote::open(name, config)?;
        Ok(LiveRetriever { remote, types: None })
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.remote.client
    }
}

impl Retriever for LiveRetriever {
    fn data_source_name(&self) -> &str {
        &self.remote.name
    }

    fn num_data_sets(&mut self) -> i32 {
        self.types = None;
        self.remote.count("")
    }

    fn get_type(&mut self, index: usize) -> DataSetType {
        if self.types.is_none() {
            self.types = self.remote.types("");
        }
        self.types
            .as_ref()
            .and_then(|t| t.get(index).copied())
            .unwrap_or(DataSetType::Invalid)
    }

    fn get_data_set(&mut self, index: usize) -> Option<DataSet> {
        let command = match self.get_type(index) {
            DataSetType::Invalid => return None,
            DataSetType::Monitor => Command::Monitors,
            _ => Command::Histogram(index),
        };
        self.remote.fetch(command)
    }

    fn data_set_info(&mut self, index: usize) -> Option<DataSetInfo> {
        self.remote.info("", index)
    }
}

impl LiveSource for LiveRetriever {
    fn status(&mut self) -> String {
        self.remote
            .text(Command::Status)
            .unwrap_or_else(status::message)
    }

    fn data_name(&mut self) -> Option<String> {
        self.remote.text(Command::Name).ok()
    }
}
