//! A scripted acquisition server speaking the JSON-lines protocol on
//! 127.0.0.1, plus small DataSet builders.

#![allow(dead_code)]

use std::io::{BufReader, BufWriter};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use neutron_retrieve::data::model::{DataSet, Spectrum, XScale};
use neutron_retrieve::remote::protocol::{read_message, write_message, Command, Message};
use neutron_retrieve::{DataSetInfo, DataSetType, RetrievalConfig};

pub const USER: &str = "alice";
pub const PASSWORD: &str = "secret";

pub fn data_set(title: &str, groups: &[i32]) -> DataSet {
    let mut ds = DataSet::new(title, "Time(us)", "Time-of-flight");
    for &group in groups {
        let x = XScale::uniform(1000.0, 2000.0, 11).unwrap();
        let y = (0..10).map(|i| (i * group) as f64).collect();
        ds.spectra.push(Spectrum::new(x, y, None, group).unwrap());
    }
    ds
}

/// Timeouts short enough for tests; cooldown as given.
pub fn config(cooldown_ms: u64) -> RetrievalConfig {
    RetrievalConfig {
        timeout_ms: 2_000,
        reconnect_cooldown_ms: cooldown_ms,
        ..RetrievalConfig::default()
    }
}

#[derive(Default)]
pub struct Script {
    pub roster: Vec<(DataSetType, DataSet)>,
    pub status: String,
    pub name: String,
    /// Close the first session after it has answered this many commands
    /// past the handshake.
    pub drop_first_session_after: Option<usize>,
    /// How many `types` commands have been answered.
    pub types_requests: usize,
}

pub struct FakeServer {
    pub port: u16,
    pub script: Arc<Mutex<Script>>,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    pub fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let script = Arc::new(Mutex::new(script));
        let connections = Arc::new(AtomicUsize::new(0));

        let shared = Arc::clone(&script);
        let counter = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let nth = counter.fetch_add(1, Ordering::SeqCst);
                let script = Arc::clone(&shared);
                thread::spawn(move || serve(stream, nth, script));
            }
        });
        FakeServer {
            port,
            script,
            connections,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// `host;port;user;password;[file]`
    pub fn descriptor(&self, user: &str, password: &str, file: Option<&str>) -> String {
        format!("127.0.0.1;{};{user};{password};{}", self.port, file.unwrap_or(""))
    }
}

/// A port nothing listens on.
pub fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn serve(stream: TcpStream, nth: usize, script: Arc<Mutex<Script>>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = BufWriter::new(stream);
    let mut answered = 0usize;

    while let Ok(message) = read_message(&mut reader) {
        let Message::Command(text) = message else {
            break;
        };
        let command: Command = match text.parse() {
            Ok(command) => command,
            Err(e) => {
                let _ = write_message(&mut writer, &Message::NotOk(e.to_string()));
                continue;
            }
        };
        let is_handshake = matches!(command, Command::User(_) | Command::Password(_));
        if !is_handshake && nth == 0 {
            let limit = script.lock().unwrap().drop_first_session_after;
            if limit == Some(answered) {
                return;
            }
        }
        let reply = answer(&command, &mut script.lock().unwrap());
        if write_message(&mut writer, &reply).is_err() {
            return;
        }
        if !is_handshake {
            answered += 1;
        }
    }
}

fn answer(command: &Command, script: &mut Script) -> Message {
    let fetch = |index: usize| match script.roster.get(index) {
        Some((_, ds)) => Message::DataSet(Box::new(ds.clone())),
        None => Message::NotOk(format!("no DataSet {index}")),
    };
    match command {
        Command::User(user) if user == USER => Message::Ok,
        Command::Password(password) if password == PASSWORD => Message::Ok,
        Command::User(_) | Command::Password(_) => Message::NotOk("refused".into()),
        Command::Status => Message::Text(script.status.clone()),
        Command::Name => Message::Text(script.name.clone()),
        Command::Count { .. } => Message::Count(script.roster.len() as i64),
        Command::Types { .. } => {
            script.types_requests += 1;
            Message::Types(script.roster.iter().map(|(t, _)| *t).collect())
        }
        Command::DataSet { index, .. } | Command::Histogram(index) => fetch(*index),
        Command::Monitors => match script.roster.iter().position(|(t, _)| *t == DataSetType::Monitor) {
            Some(index) => fetch(index),
            None => Message::NotOk("no monitors".into()),
        },
        Command::Info { index, .. } => match script.roster.get(*index) {
            Some((t, ds)) => Message::Info(DataSetInfo::describe(ds, *t)),
            None => Message::NotOk(format!("no DataSet {index}")),
        },
    }
}
