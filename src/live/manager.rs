use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use super::state::{LiveState, Snapshot};
use crate::config::RetrievalConfig;
use crate::data::model::DataSet;
use crate::diagnostics::DiagnosticSink;
use crate::error::RetrieveError;
use crate::remote::retriever::LiveRetriever;
use crate::retriever::{status, DataSetType, Retriever};

/// Prefix of every roster-change notification.
pub const DATA_CHANGED: &str = "Data Changed ";

/// A retriever the poller can watch.
pub trait LiveSource: Retriever {
    /// Free-text server status, forwarded verbatim to subscribers.
    fn status(&mut self) -> String;

    /// Name of the run being collected, `None` when it cannot be read.
    fn data_name(&mut self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub enum LiveEvent {
    Status(String),
    DataChanged(String),
    Updated(Snapshot),
}

enum Request {
    NumDataSets(Sender<i32>),
    GetType(usize, Sender<DataSetType>),
    GetDataSet(usize, Sender<Option<Snapshot>>),
    UpdateNow(usize, Sender<Option<Snapshot>>),
    SetInterval(Duration),
    Interval(Sender<Duration>),
    SetIgnore(usize, bool),
    Ignore(usize, Sender<bool>),
    Subscribe(Sender<LiveEvent>),
    Shutdown,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Keeps a local copy of a live server's DataSets current.
///
/// All state lives on one worker thread; every method here is a request
/// to that thread and waits for its answer, so calls never interleave
/// with a refresh in progress.
pub struct LiveDataManager {
    requests: Sender<Request>,
    worker: Option<JoinHandle<()>>,
    config: RetrievalConfig,
}

impl LiveDataManager {
    /// Connect to the live server named by `descriptor` and start polling.
    /// A server that cannot be reached still yields a manager, reporting
    /// [`status::NO_CONNECTION`].
    pub fn connect(
        descriptor: &str,
        config: &RetrievalConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, RetrieveError> {
        match LiveRetriever::connect(descriptor, config) {
            Ok(source) => Ok(Self::start(Some(source), config, sink)),
            Err(e @ RetrieveError::MalformedSource(_)) => Err(e),
            Err(e) => {
                sink.report(descriptor, &e.to_string());
                Ok(Self::start(None::<LiveRetriever>, config, sink))
            }
        }
    }

    /// Start polling `source`. The first roster is fetched before any
    /// request is answered.
    pub fn start<S: LiveSource + 'static>(
        source: Option<S>,
        config: &RetrievalConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let (tx, rx) = unbounded();
        let mut worker = Worker {
            name: source
                .as_ref()
                .map(|s| s.data_source_name().to_string())
                .unwrap_or_default(),
            source,
            state: LiveState::default(),
            requests: rx,
            subscribers: Vec::new(),
            interval: config.clamp_poll_interval(config.poll_interval_secs),
            slices: config.poll_slices.max(1),
            sink,
        };
        let handle = thread::spawn(move || worker.run());
        LiveDataManager {
            requests: tx,
            worker: Some(handle),
            config: config.clone(),
        }
    }

    fn ask<T>(&self, make: impl FnOnce(Sender<T>) -> Request) -> Option<T> {
        let (tx, rx) = bounded(1);
        self.requests.send(make(tx)).ok()?;
        rx.recv().ok()
    }

    pub fn num_data_sets(&self) -> i32 {
        self.ask(Request::NumDataSets).unwrap_or(status::NO_DATA_MANAGER)
    }

    pub fn get_type(&self, index: usize) -> DataSetType {
        self.ask(|tx| Request::GetType(index, tx))
            .unwrap_or(DataSetType::Invalid)
    }

    pub fn get_data_set(&self, index: usize) -> Option<Snapshot> {
        self.ask(|tx| Request::GetDataSet(index, tx)).flatten()
    }

    /// Fetch DataSet `index` now, resynchronising the roster first when
    /// `index` is beyond it or when the server's title has changed.
    pub fn update_data_set_now(&self, index: usize) -> Option<Snapshot> {
        self.ask(|tx| Request::UpdateNow(index, tx)).flatten()
    }

    /// Set the time between refreshes, clamped to the configured range.
    pub fn set_update_interval(&self, seconds: f64) {
        let interval = self.config.clamp_poll_interval(seconds);
        let _ = self.requests.send(Request::SetInterval(interval));
    }

    pub fn update_interval(&self) -> Duration {
        self.ask(Request::Interval)
            .unwrap_or_else(|| self.config.clamp_poll_interval(self.config.poll_interval_secs))
    }

    pub fn set_update_ignore_flag(&self, index: usize, ignore: bool) {
        let _ = self.requests.send(Request::SetIgnore(index, ignore));
    }

    /// Whether DataSet `index` is skipped by periodic refreshes; true for
    /// indices outside the roster.
    pub fn update_ignore_flag(&self, index: usize) -> bool {
        self.ask(|tx| Request::Ignore(index, tx)).unwrap_or(true)
    }

    pub fn subscribe(&self) -> Receiver<LiveEvent> {
        let (tx, rx) = unbounded();
        let _ = self.requests.send(Request::Subscribe(tx));
        rx
    }

    /// Stop the worker and wait for it to finish.
    pub fn shutdown(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("live worker panicked");
            }
        }
    }
}

impl Drop for LiveDataManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker<S> {
    name: String,
    source: Option<S>,
    state: LiveState,
    requests: Receiver<Request>,
    subscribers: Vec<Sender<LiveEvent>>,
    interval: Duration,
    slices: u32,
    sink: Arc<dyn DiagnosticSink>,
}

impl<S: LiveSource> Worker<S> {
    fn run(&mut self) {
        info!("{}: live polling every {:?}", self.name, self.interval);
        self.resync();
        while self.sleep() {
            self.cycle();
        }
        info!("{}: live polling stopped", self.name);
    }

    /// Wait one interval in slices, serving requests meanwhile. False
    /// once the manager is gone.
    fn sleep(&mut self) -> bool {
        for _ in 0..self.slices {
            let deadline = Instant::now() + self.interval / self.slices;
            loop {
                match self.requests.recv_deadline(deadline) {
                    Ok(Request::Shutdown) => return false,
                    Ok(request) => self.handle(request),
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => return false,
                }
            }
        }
        true
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::NumDataSets(tx) => {
                let _ = tx.send(self.state.num_data_sets());
            }
            Request::GetType(i, tx) => {
                let _ = tx.send(self.state.data_set_type(i));
            }
            Request::GetDataSet(i, tx) => {
                let _ = tx.send(self.state.snapshot(i));
            }
            Request::UpdateNow(i, tx) => {
                let snapshot = self.update_now(i);
                let _ = tx.send(snapshot);
            }
            Request::SetInterval(interval) => {
                debug!("{}: interval now {interval:?}", self.name);
                self.interval = interval;
            }
            Request::Interval(tx) => {
                let _ = tx.send(self.interval);
            }
            Request::SetIgnore(i, ignore) => self.state.set_ignore(i, ignore),
            Request::Ignore(i, tx) => {
                let _ = tx.send(self.state.ignore(i));
            }
            Request::Subscribe(tx) => self.subscribers.push(tx),
            Request::Shutdown => {}
        }
    }

    fn publish(&mut self, event: LiveEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn data_changed(&mut self, detail: &str) {
        self.publish(LiveEvent::DataChanged(format!("{DATA_CHANGED}{detail}")));
    }

    /// One poll: status, roster check, new-run check, refresh.
    fn cycle(&mut self) {
        let Some(source) = self.source.as_mut() else {
            self.resync();
            return;
        };
        let text = source.status();
        self.publish(LiveEvent::Status(text));

        let Some(source) = self.source.as_mut() else {
            return;
        };
        let count = source.num_data_sets();
        if count != self.state.len() as i32 {
            self.resync();
        } else if count != self.state.error_flag {
            self.state.error_flag = count;
            self.data_changed(&format!("status {count}"));
        }

        let new_run = match self.source.as_mut().and_then(|s| s.data_name()) {
            Some(name) => self.state.note_data_name(&name),
            None => false,
        };
        if new_run {
            info!("{}: new run {}", self.name, self.state.last_data_name);
        }

        for i in 0..self.state.len() {
            if new_run || !self.state.ignore(i) {
                self.update_now(i);
            }
        }
    }

    /// Rebuild the roster from the server.
    fn resync(&mut self) {
        let Some(source) = self.source.as_mut() else {
            if self.state.error_flag != status::NO_CONNECTION {
                self.state.error_flag = status::NO_CONNECTION;
                self.data_changed("no connection");
            }
            return;
        };
        let count = source.num_data_sets();
        let mut fresh = Vec::with_capacity(count.max(0) as usize);
        for i in 0..count.max(0) as usize {
            let data_set_type = source.get_type(i);
            let data_set = source.get_data_set(i);
            if data_set.is_none() {
                self.sink.report(&self.name, &format!("DataSet {i} could not be fetched"));
            }
            fresh.push((data_set_type, data_set));
        }

        if count != self.state.error_flag {
            self.state.error_flag = count;
            self.data_changed(&format!("status {count}"));
        }
        if fresh.is_empty() && self.state.is_empty() {
            return;
        }
        let resized = fresh.len() != self.state.len();
        let snapshots = self.state.reconcile(fresh);
        debug!("{}: roster now {} DataSets", self.name, self.state.len());
        for snapshot in snapshots {
            self.publish(LiveEvent::Updated(snapshot));
        }
        if resized {
            self.data_changed(&format!("{} DataSets", self.state.len()));
        } else {
            self.data_changed("refreshed");
        }
    }

    fn update_now(&mut self, index: usize) -> Option<Snapshot> {
        if index >= self.state.len() {
            self.resync();
            return self.state.snapshot(index);
        }
        let fetched: Option<DataSet> = self.source.as_mut()?.get_data_set(index);
        let Some(data_set) = fetched else {
            self.sink.report(&self.name, &format!("DataSet {index} could not be fetched"));
            return self.state.snapshot(index);
        };
        let cached_title = self.state.slots[index].title().map(str::to_string);
        if cached_title.as_deref() != Some(data_set.title.as_str()) {
            self.resync();
            return self.state.snapshot(index);
        }
        let snapshot = self.state.merge(index, data_set)?;
        self.publish(LiveEvent::Updated(snapshot.clone()));
        Some(snapshot)
    }
}
