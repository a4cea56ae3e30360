//! Wire format spoken with acquisition servers.
//!
//! One JSON document per line. The client sends [`Message::Command`]
//! frames and reads exactly one frame back for each; either side may send
//! [`Message::Exit`] to end the session.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::model::DataSet;
use crate::retriever::{DataSetInfo, DataSetType};

/// Written in place of an empty file name.
pub const NO_FILE: &str = "-";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("bad frame: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("peer closed the connection")]
    Closed,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("unexpected reply: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Command(String),
    Ok,
    NotOk(String),
    Text(String),
    Count(i64),
    Types(Vec<DataSetType>),
    DataSet(Box<DataSet>),
    Info(DataSetInfo),
    Exit,
}

impl Message {
    /// Short name for log lines; DataSet frames can be large.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Command(_) => "Command",
            Message::Ok => "Ok",
            Message::NotOk(_) => "NotOk",
            Message::Text(_) => "Text",
            Message::Count(_) => "Count",
            Message::Types(_) => "Types",
            Message::DataSet(_) => "DataSet",
            Message::Info(_) => "Info",
            Message::Exit => "Exit",
        }
    }
}

pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<(), ProtocolError> {
    serde_json::to_writer(&mut *writer, message)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Message, ProtocolError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(ProtocolError::Closed);
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    User(String),
    Password(String),
    Status,
    Name,
    Count { file: String },
    Types { file: String },
    DataSet { file: String, index: usize },
    Info { file: String, index: usize },
    Monitors,
    Histogram(usize),
}

fn file_token(file: &str) -> &str {
    if file.is_empty() {
        NO_FILE
    } else {
        file
    }
}

fn file_from_token(token: &str) -> String {
    if token == NO_FILE {
        String::new()
    } else {
        token.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::User(name) => write!(f, "user {name}"),
            Command::Password(pw) => write!(f, "password {pw}"),
            Command::Status => f.write_str("get status"),
            Command::Name => f.write_str("get name"),
            Command::Count { file } => write!(f, "get count {}", file_token(file)),
            Command::Types { file } => write!(f, "get types {}", file_token(file)),
            Command::DataSet { file, index } => {
                write!(f, "get dataset {} {index}", file_token(file))
            }
            Command::Info { file, index } => write!(f, "get info {} {index}", file_token(file)),
            Command::Monitors => f.write_str("get monitors"),
            Command::Histogram(index) => write!(f, "get histogram {index}"),
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    /// File names may contain spaces; an index is always the last token.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ProtocolError::UnknownCommand(s.to_string());
        let file_and_index = |rest: &str| -> Result<(String, usize), ProtocolError> {
            let (file, index) = rest.rsplit_once(' ').ok_or_else(unknown)?;
            let index = index.parse::<usize>().map_err(|_| unknown())?;
            Ok((file_from_token(file.trim()), index))
        };

        if let Some(name) = s.strip_prefix("user ") {
            return Ok(Command::User(name.to_string()));
        }
        if let Some(pw) = s.strip_prefix("password ") {
            return Ok(Command::Password(pw.to_string()));
        }
        let rest = s.strip_prefix("get ").ok_or_else(unknown)?.trim();
        let (verb, args) = rest.split_once(' ').unwrap_or((rest, ""));
        match verb {
            "status" => Ok(Command::Status),
            "name" => Ok(Command::Name),
            "monitors" => Ok(Command::Monitors),
            "count" => Ok(Command::Count { file: file_from_token(args.trim()) }),
            "types" => Ok(Command::Types { file: file_from_token(args.trim()) }),
            "dataset" => {
                let (file, index) = file_and_index(args)?;
                Ok(Command::DataSet { file, index })
            }
            "info" => {
                let (file, index) = file_and_index(args)?;
                Ok(Command::Info { file, index })
            }
            "histogram" => args
                .trim()
                .parse::<usize>()
                .map(Command::Histogram)
                .map_err(|_| unknown()),
            _ => Err(unknown()),
        }
    }
}

impl From<Command> for Message {
    fn from(command: Command) -> Self {
        Message::Command(command.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn file_names_with_spaces_keep_their_index() {
        let cmd: Command = "get dataset /data/my run.gsa 3".parse().unwrap();
        assert_eq!(
            cmd,
            Command::DataSet {
                file: "/data/my run.gsa".into(),
                index: 3
            }
        );
        assert_eq!(cmd.to_string(), "get dataset /data/my run.gsa 3");
    }

    #[test]
    fn empty_file_is_a_dash() {
        let cmd = Command::Count { file: String::new() };
        assert_eq!(cmd.to_string(), "get count -");
        assert_eq!("get count -".parse::<Command>().unwrap(), cmd);
    }

    #[test]
    fn rejects_unknown_verbs() {
        assert!("get weather".parse::<Command>().is_err());
        assert!("get histogram x".parse::<Command>().is_err());
        assert!("hello".parse::<Command>().is_err());
    }

    #[test]
    fn frames_are_one_line_each() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Message::Text("two\nlines".into())).unwrap();
        write_message(&mut buf, &Message::Exit).unwrap();
        assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 2);

        let mut reader = Cursor::new(buf);
        assert_eq!(read_message(&mut reader).unwrap(), Message::Text("two\nlines".into()));
        assert_eq!(read_message(&mut reader).unwrap(), Message::Exit);
        assert!(matches!(read_message(&mut reader), Err(ProtocolError::Closed)));
    }
}
