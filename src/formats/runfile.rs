//! Binary run files.
//!
//! A run holds numbered histograms (from 1). Each histogram owns a range of
//! subgroup ids; a subgroup is a set of detectors summed into one spectrum
//! and is either a beam monitor or a sample detector group. A histogram
//! yields a monitor DataSet, a sample DataSet, both or neither.
//!
//! On disk a run is `NRUN`, a version byte, then a bincode [`RunTable`].

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, error};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::attr;
use crate::data::instrument::{base_file_name, instrument_name, InstrumentType};
use crate::data::model::{AttributeValue, DataSet, ModelError, Spectrum, XScale};
use crate::diagnostics::DiagnosticSink;
use crate::retriever::{status, DataSetType, Retriever};

pub const MAGIC: &[u8; 4] = b"NRUN";
pub const VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum RunfileError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a run file")]
    BadMagic,
    #[error("unsupported run file version {0}")]
    UnsupportedVersion(u8),
    #[error("corrupt run file: {0}")]
    Decode(#[from] bincode::Error),
    #[error("no subgroup {0}")]
    UnknownSubgroup(i32),
    #[error("no detector {0}")]
    UnknownDetector(i32),
    #[error("no time field {0}")]
    UnknownTimeField(i32),
    #[error(transparent)]
    Model(#[from] ModelError),
}

// ---------------------------------------------------------------------------
// Random access to a run
// ---------------------------------------------------------------------------

/// Random access to one run by histogram number and subgroup id.
pub trait RunSource: Send {
    fn num_histograms(&self) -> usize;
    fn is_histogram_grouped(&self, hist: usize) -> bool;
    /// Ids of the subgroups belonging to `hist`, ascending.
    fn subgroup_ids(&self, hist: usize) -> Vec<i32>;
    fn is_subgroup_beam_monitor(&self, group: i32) -> bool;
    fn ids_in_subgroup(&self, group: i32) -> Vec<i32>;
    fn time_field_type(&self, group: i32) -> Result<i32, RunfileError>;
    fn time_channel_boundaries(&self, group: i32) -> Result<Vec<f64>, RunfileError>;
    fn spectrum_1d(&self, group: i32) -> Result<Vec<f64>, RunfileError>;
    /// Source-to-sample flight time in microseconds.
    fn source_to_sample_time(&self) -> f64;
    /// Source-to-sample distance in metres.
    fn source_to_sample(&self) -> f64;
    /// Effective scattering angle in degrees.
    fn detector_angle(&self, det: i32) -> Result<f64, RunfileError>;
    fn raw_detector_angle(&self, det: i32) -> Result<f64, RunfileError>;
    fn detector_height(&self, det: i32) -> Result<f64, RunfileError>;
    /// Sample-to-detector distance in metres.
    fn flight_path(&self, det: i32) -> Result<f64, RunfileError>;
    fn run_title(&self) -> String;
    fn run_number(&self) -> i64;
    fn end_date(&self) -> String;
    fn end_time(&self) -> String;
    fn num_pulses(&self) -> i64;
    /// Incident energy in meV, direct-geometry spectrometers only.
    fn energy_in(&self) -> f64;

    fn total_count(&self, group: i32) -> Result<f64, RunfileError> {
        Ok(self.spectrum_1d(group)?.iter().sum())
    }
}

// ---------------------------------------------------------------------------
// In-memory run table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHeader {
    pub run_title: String,
    pub run_number: i64,
    pub end_date: String,
    pub end_time: String,
    pub num_pulses: i64,
    pub source_to_sample: f64,
    pub source_to_sample_time: f64,
    pub energy_in: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    pub angle: f64,
    pub raw_angle: f64,
    pub height: f64,
    pub flight_path: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgroup {
    pub histogram: usize,
    pub beam_monitor: bool,
    pub detector_ids: Vec<i32>,
    pub time_field: i32,
    pub counts: Vec<f64>,
}

/// A whole run held in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTable {
    pub header: RunHeader,
    pub num_histograms: usize,
    pub detectors: BTreeMap<i32, Detector>,
    /// Bin boundaries per time field type.
    pub time_fields: BTreeMap<i32, Vec<f64>>,
    pub subgroups: BTreeMap<i32, Subgroup>,
}

impl RunTable {
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, RunfileError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(RunfileError::BadMagic);
        }
        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != VERSION {
            return Err(RunfileError::UnsupportedVersion(version[0]));
        }
        Ok(bincode::deserialize_from(reader)?)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), RunfileError> {
        writer.write_all(MAGIC)?;
        writer.write_all(&[VERSION])?;
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RunfileError> {
        Self::read_from(BufReader::new(File::open(path)?))
    }

    pub fn save(&self, path: &Path) -> Result<(), RunfileError> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    fn subgroup(&self, group: i32) -> Result<&Subgroup, RunfileError> {
        self.subgroups.get(&group).ok_or(RunfileError::UnknownSubgroup(group))
    }

    fn detector(&self, det: i32) -> Result<&Detector, RunfileError> {
        self.detectors.get(&det).ok_or(RunfileError::UnknownDetector(det))
    }

    fn ids_of(&self, hist: usize) -> impl Iterator<Item = i32> + '_ {
        self.subgroups
            .iter()
            .filter(move |(_, s)| s.histogram == hist)
            .map(|(&id, _)| id)
    }
}

impl RunSource for RunTable {
    fn num_histograms(&self) -> usize {
        self.num_histograms
    }

    fn is_histogram_grouped(&self, hist: usize) -> bool {
        self.ids_of(hist).next().is_some()
    }

    fn subgroup_ids(&self, hist: usize) -> Vec<i32> {
        self.ids_of(hist).collect()
    }

    fn is_subgroup_beam_monitor(&self, group: i32) -> bool {
        self.subgroups.get(&group).is_some_and(|s| s.beam_monitor)
    }

    fn ids_in_subgroup(&self, group: i32) -> Vec<i32> {
        self.subgroups
            .get(&group)
            .map(|s| s.detector_ids.clone())
            .unwrap_or_default()
    }

    fn time_field_type(&self, group: i32) -> Result<i32, RunfileError> {
        Ok(self.subgroup(group)?.time_field)
    }

    fn time_channel_boundaries(&self, group: i32) -> Result<Vec<f64>, RunfileError> {
        let field = self.time_field_type(group)?;
        self.time_fields
            .get(&field)
            .cloned()
            .ok_or(RunfileError::UnknownTimeField(field))
    }

    fn spectrum_1d(&self, group: i32) -> Result<Vec<f64>, RunfileError> {
        Ok(self.subgroup(group)?.counts.clone())
    }

    fn source_to_sample_time(&self) -> f64 {
        self.header.source_to_sample_time
    }

    fn source_to_sample(&self) -> f64 {
        self.header.source_to_sample
    }

    fn detector_angle(&self, det: i32) -> Result<f64, RunfileError> {
        Ok(self.detector(det)?.angle)
    }

    fn raw_detector_angle(&self, det: i32) -> Result<f64, RunfileError> {
        Ok(self.detector(det)?.raw_angle)
    }

    fn detector_height(&self, det: i32) -> Result<f64, RunfileError> {
        Ok(self.detector(det)?.height)
    }

    fn flight_path(&self, det: i32) -> Result<f64, RunfileError> {
        Ok(self.detector(det)?.flight_path)
    }

    fn run_title(&self) -> String {
        self.header.run_title.clone()
    }

    fn run_number(&self) -> i64 {
        self.header.run_number
    }

    fn end_date(&self) -> String {
        self.header.end_date.clone()
    }

    fn end_time(&self) -> String {
        self.header.end_time.clone()
    }

    fn num_pulses(&self) -> i64 {
        self.header.num_pulses
    }

    fn energy_in(&self) -> f64 {
        self.header.energy_in
    }
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

/// Serves one DataSet per (histogram, monitor/sample) pair present in a run.
pub struct RunfileRetriever {
    name: String,
    source: Option<Box<dyn RunSource>>,
    instrument: InstrumentType,
    entries: Vec<(DataSetType, usize)>,
    sink: Arc<dyn DiagnosticSink>,
}

impl RunfileRetriever {
    pub fn open(name: &str, sink: Arc<dyn DiagnosticSink>) -> Self {
        match RunTable::load(Path::new(name)) {
            Ok(table) => Self::from_source(name, Box::new(table), sink),
            Err(e) => {
                sink.report(name, &format!("cannot read run file: {e}"));
                RunfileRetriever {
                    name: name.to_string(),
                    source: None,
                    instrument: InstrumentType::from_file_name(name),
                    entries: Vec::new(),
                    sink,
                }
            }
        }
    }

    pub fn from_source(name: &str, source: Box<dyn RunSource>, sink: Arc<dyn DiagnosticSink>) -> Self {
        let mut entries = Vec::new();
        for hist in 1..=source.num_histograms() {
            if !source.is_histogram_grouped(hist) {
                continue;
            }
            let (mut monitors, mut detectors) = (false, false);
            for group in source.subgroup_ids(hist) {
                if source.ids_in_subgroup(group).is_empty() {
                    continue;
                }
                if source.is_subgroup_beam_monitor(group) {
                    monitors = true;
                } else {
                    detectors = true;
                }
            }
            if monitors {
                entries.push((DataSetType::Monitor, hist));
            }
            if detectors {
                entries.push((DataSetType::Histogram, hist));
            }
        }
        debug!("{name}: {} DataSets in {} histograms", entries.len(), source.num_histograms());
        RunfileRetriever {
            name: name.to_string(),
            source: Some(source),
            instrument: InstrumentType::from_file_name(name),
            entries,
            sink,
        }
    }

    /// The histogram a DataSet index was built from.
    pub fn histogram_of(&self, index: usize) -> Option<usize> {
        self.entries.get(index).map(|&(_, hist)| hist)
    }

    fn build(&self, source: &dyn RunSource, hist: usize, monitor: bool) -> Result<DataSet, RunfileError> {
        let prefix = if monitor { 'M' } else { 'H' };
        let title = format!("{prefix}{hist}_{}", base_file_name(&self.name));
        let mut ds = DataSet::new(&title, "Time(us)", "Time-of-flight");
        ds.set_attribute(attr::FILE_NAME, self.name.as_str());
        ds.set_attribute(attr::INST_NAME, instrument_name(&self.name));
        ds.set_attribute(attr::INST_TYPE, self.instrument.to_string());
        ds.set_attribute(attr::RUN_TITLE, source.run_title());
        ds.set_attribute(attr::RUN_NUM, source.run_number());
        ds.set_attribute(attr::END_DATE, source.end_date());
        ds.set_attribute(attr::END_TIME, source.end_time());
        ds.set_attribute(attr::NUMBER_OF_PULSES, source.num_pulses());
        ds.set_attribute(
            attr::DS_TYPE,
            if monitor { attr::MONITOR_DATA } else { attr::SAMPLE_DATA },
        );

        let shift_times = self.instrument == InstrumentType::TofDgSpectrometer && !monitor;
        let mut last_field: Option<i32> = None;
        let mut x_scale: Option<XScale> = None;

        for group in source.subgroup_ids(hist) {
            let members = source.ids_in_subgroup(group);
            if members.is_empty() || source.is_subgroup_beam_monitor(group) != monitor {
                continue;
            }
            let field = source.time_field_type(group)?;
            if last_field != Some(field) {
                let mut edges = source.time_channel_boundaries(group)?;
                if shift_times {
                    let t0 = source.source_to_sample_time();
                    edges.iter_mut().for_each(|t| *t -= t0);
                }
                x_scale = Some(XScale::variable(edges)?);
                last_field = Some(field);
            }
            let Some(x) = x_scale.clone() else {
                continue;
            };
            let counts = source.spectrum_1d(group)?;
            if counts.is_empty() {
                continue;
            }
            let mut spectrum = Spectrum::new(x, counts, None, group)?.with_sqrt_errors();
            self.add_spectrum_attributes(source, &mut spectrum, &members, field)?;
            ds.spectra.push(spectrum);
        }
        Ok(ds)
    }

    fn add_spectrum_attributes(
        &self,
        source: &dyn RunSource,
        spectrum: &mut Spectrum,
        members: &[i32],
        field: i32,
    ) -> Result<(), RunfileError> {
        let n = members.len() as f64;
        let first = members[0];
        let mut height = 0.0;
        let mut path = 0.0;
        for &det in members {
            height += source.detector_height(det)?;
            path += source.flight_path(det)?;
        }
        let (height, path) = (height / n, path / n);
        let angle = source.detector_angle(first)?.to_radians();
        let r = (path * path - height * height).max(0.0).sqrt();

        spectrum.set_attribute(attr::RUN_NUM, source.run_number());
        spectrum.set_attribute(attr::TIME_FIELD_TYPE, i64::from(field));
        spectrum.set_attribute(
            attr::DETECTOR_IDS,
            AttributeValue::IntList(members.iter().map(|&d| i64::from(d)).collect()),
        );
        spectrum.set_attribute(attr::INITIAL_PATH, source.source_to_sample());
        if self.instrument == InstrumentType::TofDgSpectrometer {
            spectrum.set_attribute(attr::ENERGY_IN, source.energy_in());
        }
        spectrum.set_attribute(attr::DETECTOR_POS, AttributeValue::cylindrical(r, angle, height));
        spectrum.set_attribute(attr::RAW_ANGLE, source.raw_detector_angle(first)?);
        spectrum.set_attribute(attr::NUMBER_OF_PULSES, source.num_pulses());
        spectrum.set_attribute(attr::TOTAL_COUNT, source.total_count(spectrum.group_id)?);
        Ok(())
    }
}

impl Retriever for RunfileRetriever {
    fn data_source_name(&self) -> &str {
        &self.name
    }

    fn num_data_sets(&mut self) -> i32 {
        match self.source {
            Some(_) => self.entries.len() as i32,
            None => status::BAD_FILE_NAME,
        }
    }

    fn get_type(&mut self, index: usize) -> DataSetType {
        self.entries
            .get(index)
            .map(|&(ty, _)| ty)
            .unwrap_or(DataSetType::Invalid)
    }

    fn get_data_set(&mut self, index: usize) -> Option<DataSet> {
        let &(ty, hist) = self.entries.get(index)?;
        let source = self.source.as_deref()?;
        match self.build(source, hist, ty == DataSetType::Monitor) {
            Ok(ds) => Some(ds),
            Err(e) => {
                error!("{}: histogram {hist} failed: {e}", self.name);
                self.sink.report(&self.name, &format!("histogram {hist}: {e}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;

    fn subgroup(histogram: usize, beam_monitor: bool, dets: &[i32], counts: &[f64]) -> Subgroup {
        Subgroup {
            histogram,
            beam_monitor,
            detector_ids: dets.to_vec(),
            time_field: 1,
            counts: counts.to_vec(),
        }
    }

    fn table() -> RunTable {
        let mut t = RunTable {
            header: RunHeader {
                run_title: "vanadium".into(),
                run_number: 2447,
                source_to_sample: 11.6,
                source_to_sample_time: 100.0,
                energy_in: 120.0,
                ..RunHeader::default()
            },
            num_histograms: 2,
            ..RunTable::default()
        };
        t.time_fields.insert(1, vec![1000.0, 1100.0, 1200.0]);
        for det in 1..=4 {
            t.detectors.insert(
                det,
                Detector {
                    angle: 90.0,
                    raw_angle: 89.5,
                    height: 3.0,
                    flight_path: 2.0,
                },
            );
        }
        // histogram 1: one monitor, two detector groups; histogram 2: monitors only
        t.subgroups.insert(1, subgroup(1, true, &[1], &[5.0, 6.0]));
        t.subgroups.insert(2, subgroup(1, false, &[2, 3], &[9.0, 16.0]));
        t.subgroups.insert(3, subgroup(1, false, &[4], &[1.0, 1.0]));
        t.subgroups.insert(4, subgroup(2, true, &[1], &[2.0, 3.0]));
        t
    }

    #[test]
    fn monitor_only_histogram_yields_one_data_set() {
        let sink = Arc::new(MemorySink::new());
        let mut r = RunfileRetriever::from_source("hrcs2447.run", Box::new(table()), sink);
        assert_eq!(r.num_data_sets(), 3);
        assert_eq!(r.get_type(0), DataSetType::Monitor);
        assert_eq!(r.get_type(1), DataSetType::Histogram);
        assert_eq!(r.get_type(2), DataSetType::Monitor);
        assert_eq!(r.histogram_of(2), Some(2));
        assert_eq!(r.get_type(3), DataSetType::Invalid);
        assert!(r.get_data_set(3).is_none());
    }

    #[test]
    fn sample_data_set_carries_shifted_times_and_positions() {
        let sink = Arc::new(MemorySink::new());
        let mut r = RunfileRetriever::from_source("hrcs2447.run", Box::new(table()), sink);
        let ds = r.get_data_set(1).unwrap();
        assert_eq!(ds.title, "H1_hrcs2447");
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.spectra[0].x.values(), vec![900.0, 1000.0, 1100.0]);
        assert_eq!(ds.spectra[0].errors, Some(vec![3.0, 4.0]));
        let s = &ds.spectra[0];
        assert_eq!(s.attribute(attr::TOTAL_COUNT).and_then(|v| v.as_f64()), Some(25.0));
        assert_eq!(s.attribute(attr::DETECTOR_IDS), Some(&AttributeValue::IntList(vec![2, 3])));
        // height exceeds the flight path, so the radial part clamps to zero
        let Some(AttributeValue::Position { x, y, z }) = s.attribute(attr::DETECTOR_POS) else {
            panic!("no position");
        };
        assert_eq!((*x, *y, *z), (0.0, 0.0, 3.0));
        assert!(s.attribute(attr::ENERGY_IN).is_some());

        let monitor = r.get_data_set(0).unwrap();
        assert_eq!(monitor.title, "M1_hrcs2447");
        assert_eq!(monitor.spectra[0].x.values(), vec![1000.0, 1100.0, 1200.0]);
    }

    #[test]
    fn id_gaps_are_not_classified() {
        let mut t = table();
        t.num_histograms = 1;
        t.subgroups.clear();
        t.subgroups.insert(1, subgroup(1, true, &[1], &[5.0, 6.0]));
        t.subgroups.insert(3, subgroup(1, true, &[2], &[7.0, 8.0]));
        let sink = Arc::new(MemorySink::new());
        let mut r = RunfileRetriever::from_source("hrcs2447.run", Box::new(t), sink);
        assert_eq!(r.num_data_sets(), 1);
        assert_eq!(r.get_type(0), DataSetType::Monitor);
        assert_eq!(r.get_data_set(0).unwrap().len(), 2);
    }

    #[test]
    fn interleaved_ids_stay_with_their_histogram() {
        let mut t = table();
        t.subgroups.clear();
        t.subgroups.insert(1, subgroup(1, false, &[1], &[5.0, 6.0]));
        t.subgroups.insert(2, subgroup(2, false, &[2], &[7.0, 8.0]));
        t.subgroups.insert(3, subgroup(1, false, &[3], &[9.0, 9.0]));
        let sink = Arc::new(MemorySink::new());
        let mut r = RunfileRetriever::from_source("hrcs2447.run", Box::new(t), sink);
        assert_eq!(r.num_data_sets(), 2);
        let first = r.get_data_set(0).unwrap();
        let groups: Vec<i32> = first.spectra.iter().map(|s| s.group_id).collect();
        assert_eq!(groups, vec![1, 3]);
        assert_eq!(r.get_data_set(1).unwrap().spectra[0].group_id, 2);
    }

    #[test]
    fn empty_subgroup_does_not_create_a_data_set() {
        let mut t = table();
        t.num_histograms = 1;
        t.subgroups.clear();
        t.subgroups.insert(1, subgroup(1, true, &[1], &[5.0, 6.0]));
        t.subgroups.insert(2, subgroup(1, false, &[], &[]));
        let sink = Arc::new(MemorySink::new());
        let mut r = RunfileRetriever::from_source("hrcs2447.run", Box::new(t), sink);
        assert_eq!(r.num_data_sets(), 1);
        assert_eq!(r.get_type(0), DataSetType::Monitor);
    }

    #[test]
    fn broken_histogram_is_reported_not_raised() {
        let mut t = table();
        t.subgroups.get_mut(&2).unwrap().time_field = 9;
        let sink = Arc::new(MemorySink::new());
        let mut r = RunfileRetriever::from_source("gppd100.run", Box::new(t), sink.clone());
        assert!(r.get_data_set(1).is_none());
        assert!(sink.contains("no time field 9"));
        assert!(r.get_data_set(0).is_some());
    }

    #[test]
    fn table_survives_disk_format() {
        let mut bytes = Vec::new();
        table().write_to(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(RunTable::read_from(bytes.as_slice()).unwrap(), table());
        bytes[0] = b'X';
        assert!(matches!(RunTable::read_from(bytes.as_slice()), Err(RunfileError::BadMagic)));
    }
}
