//! Parsing of `machine;port;user;password;file` source descriptors.

use std::fmt;
use std::str::FromStr;

use crate::error::RetrieveError;

pub const DELIMITER: char = ';';
const NUM_FIELDS: usize = 5;

/// A remote data source. Every field is optional; descriptors with fewer
/// than five fields leave the trailing ones `None`. Only the file field
/// may run to the end of the text, so a live source without a file is
/// written `machine;port;user;password;`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalSource {
    pub machine: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub file: Option<String>,
}

impl RetrievalSource {
    pub fn parse(descriptor: &str) -> Result<Self, RetrieveError> {
        let machine = field(descriptor, 0);
        let port = match field(descriptor, 1) {
            Some(text) => Some(text.trim().parse::<u16>().map_err(|_| {
                RetrieveError::MalformedSource(format!("bad port '{text}' in '{descriptor}'"))
            })?),
            None => None,
        };
        Ok(RetrievalSource {
            machine,
            port,
            user: field(descriptor, 2),
            password: field(descriptor, 3),
            file: field(descriptor, 4),
        })
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

/// Field `index` is the text between delimiter `index - 1` (or the start)
/// and delimiter `index`. A field with no closing delimiter is `None`,
/// except the file field, which runs to the end of the descriptor so file
/// names may contain the delimiter. Empty fields are `None`.
fn field(descriptor: &str, index: usize) -> Option<String> {
    let mut bounds = vec![0usize];
    for (pos, c) in descriptor.char_indices() {
        if c == DELIMITER && bounds.len() < NUM_FIELDS {
            bounds.push(pos + c.len_utf8());
        }
    }
    let start = *bounds.get(index)?;
    let end = match bounds.get(index + 1) {
        Some(next) => next - DELIMITER.len_utf8(),
        None if index == NUM_FIELDS - 1 => descriptor.len(),
        None => return None,
    };
    let text = &descriptor[start..end];
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

impl FromStr for RetrievalSource {
    type Err = RetrieveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RetrievalSource::parse(s)
    }
}

impl fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = self.port.map(|p| p.to_string());
        let fields = [
            self.machine.as_deref(),
            port.as_deref(),
            self.user.as_deref(),
            self.password.as_deref(),
            self.file.as_deref(),
        ];
        let Some(last) = fields.iter().rposition(|f| f.is_some()) else {
            return Ok(());
        };
        for (i, field) in fields[..=last].iter().enumerate() {
            if i > 0 {
                write!(f, "{DELIMITER}")?;
            }
            f.write_str(field.unwrap_or(""))?;
        }
        if last < NUM_FIELDS - 1 {
            write!(f, "{DELIMITER}")?;
        }
        Ok(())
    }
}
