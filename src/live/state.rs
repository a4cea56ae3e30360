use std::sync::Arc;

use crate::data::model::DataSet;
use crate::retriever::DataSetType;

/// An immutable view of one cached DataSet.
///
/// `slot_id` stays the same for as long as the server keeps serving a
/// DataSet with the same title at the same index; `version` grows every
/// time the content is replaced.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub slot_id: u64,
    pub version: u64,
    pub data_set: Arc<DataSet>,
}

// ---------------------------------------------------------------------------
// Cached slots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Slot {
    pub slot_id: u64,
    pub version: u64,
    pub data_set_type: DataSetType,
    /// Skipped by the periodic refresh unless a new run starts.
    pub ignore: bool,
    pub data_set: Option<Arc<DataSet>>,
}

impl Slot {
    pub fn title(&self) -> Option<&str> {
        self.data_set.as_deref().map(|ds| ds.title.as_str())
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.data_set.as_ref().map(|ds| Snapshot {
            slot_id: self.slot_id,
            version: self.version,
            data_set: Arc::clone(ds),
        })
    }
}

/// Everything the poller knows about the server, owned by its worker.
#[derive(Debug)]
pub struct LiveState {
    pub slots: Vec<Slot>,

    /// Last count or status code the server answered.
    pub error_flag: i32,

    /// Name of the run the server was last collecting.
    pub last_data_name: String,

    next_slot_id: u64,
}

impl Default for LiveState {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            error_flag: 0,
            last_data_name: "NONE".to_string(),
            next_slot_id: 1,
        }
    }
}

impl LiveState {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Count reported to callers: the status code while the server is in
    /// error, the number of slots otherwise.
    pub fn num_data_sets(&self) -> i32 {
        if self.error_flag < 0 {
            self.error_flag
        } else {
            self.slots.len() as i32
        }
    }

    pub fn data_set_type(&self, index: usize) -> DataSetType {
        self.slots
            .get(index)
            .map(|s| s.data_set_type)
            .unwrap_or(DataSetType::Invalid)
    }

    pub fn snapshot(&self, index: usize) -> Option<Snapshot> {
        self.slots.get(index).and_then(Slot::snapshot)
    }

    pub fn ignore(&self, index: usize) -> bool {
        self.slots.get(index).map(|s| s.ignore).unwrap_or(true)
    }

    pub fn set_ignore(&mut self, index: usize, ignore: bool) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.ignore = ignore;
        }
    }

    /// Record a new run name; true when it differs from the last one.
    pub fn note_data_name(&mut self, name: &str) -> bool {
        if self.last_data_name == name {
            return false;
        }
        self.last_data_name = name.to_string();
        true
    }

    /// Replace the roster with freshly fetched DataSets.
    ///
    /// With an unchanged count every slot keeps its id and ignore flag and
    /// takes the fresh content; a DataSet that could not be fetched leaves
    /// the cached one in place. After a resize a slot is kept only when the
    /// fresh DataSet at the same index has the same title; every other
    /// slot is new and starts out ignored. Returns snapshots of every slot
    /// holding data.
    pub fn reconcile(&mut self, fresh: Vec<(DataSetType, Option<DataSet>)>) -> Vec<Snapshot> {
        let resized = fresh.len() != self.slots.len();
        let old = std::mem::take(&mut self.slots);
        let mut slots = Vec::with_capacity(fresh.len());
        for (i, (data_set_type, data_set)) in fresh.into_iter().enumerate() {
            let kept = old.get(i).filter(|slot| {
                !resized
                    || (slot.title().is_some()
                        && slot.title() == data_set.as_ref().map(|d| d.title.as_str()))
            });
            let slot = match kept {
                Some(slot) if data_set.is_none() => slot.clone(),
                Some(slot) => Slot {
                    slot_id: slot.slot_id,
                    version: slot.version + 1,
                    data_set_type,
                    ignore: slot.ignore,
                    data_set: data_set.map(Arc::new),
                },
                None => Slot {
                    slot_id: self.allocate_id(),
                    version: 1,
                    data_set_type,
                    ignore: true,
                    data_set: data_set.map(Arc::new),
                },
            };
            slots.push(slot);
        }
        self.slots = slots;
        self.slots.iter().filter_map(Slot::snapshot).collect()
    }

    /// Replace the content of slot `index`, keeping its identity. The
    /// caller checks that the title still matches.
    pub fn merge(&mut self, index: usize, data_set: DataSet) -> Option<Snapshot> {
        let slot = self.slots.get_mut(index)?;
        slot.version += 1;
        slot.data_set = Some(Arc::new(data_set));
        slot.snapshot()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_slot_id;
        self.next_slot_id += 1;
        id
    }
}
