//! GSAS powder-diffraction text files.
//!
//! Layout: a title line, an optional `Instrument parameter file:` line,
//! then any mix of `TIME_MAP` and `BANK` records. A bank binned by time
//! map refers to a map by index, so the map has to appear first.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use log::debug;

use super::calibration::{Calibrator, IparmCalibrator};
use crate::data::assemble::{assemble, RawSpectrum, Titles};
use crate::data::attr;
use crate::data::instrument::InstrumentType;
use crate::data::model::{Attributes, DataSet, Spectrum, XScale};
use crate::diagnostics::DiagnosticSink;
use crate::retriever::{status, DataSetType, Retriever};

pub const IPARM_TAG: &str = "Instrument parameter file:";
const TIME_MAP_TAG: &str = "TIME_MAP";
const BANK_TAG: &str = "BANK";
const FIELD_WIDTH: usize = 8;
const STD_PER_LINE: usize = 10;
const ESD_PAIRS_PER_LINE: usize = 5;
/// Upper bound on channels per bank and boundaries per time map.
pub const MAX_CHANNELS: usize = 1 << 22;

// ---------------------------------------------------------------------------
// Record headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinType {
    /// Constant time step.
    Cons,
    /// Constant d-spacing step.
    Cond,
    /// Constant Q step.
    Conq,
    /// Logarithmic time binning.
    Slog,
    TimeMap,
}

impl BinType {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "CONST" | "CONS" => Some(BinType::Cons),
            "COND" => Some(BinType::Cond),
            "CONQ" => Some(BinType::Conq),
            "SLOG" => Some(BinType::Slog),
            TIME_MAP_TAG => Some(BinType::TimeMap),
            _ => None,
        }
    }

    pub fn units(&self) -> &'static str {
        match self {
            BinType::Cons | BinType::Slog | BinType::TimeMap => "Time(us)",
            BinType::Cond => "Angstroms",
            BinType::Conq => "Inverse Angstroms",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Ten values per line, no errors.
    Std,
    /// Five value/error pairs per line.
    Esd,
}

/// `BANK n nchan nrec BINTYP c1 c2 c3 c4 TYPE`
#[derive(Debug, Clone, PartialEq)]
pub struct BankHeader {
    pub bank: i32,
    pub nchan: usize,
    pub nrec: usize,
    pub bin_type: BinType,
    pub coefficients: Vec<f64>,
    pub value_type: ValueType,
}

impl BankHeader {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some(BANK_TAG) {
            return Err(format!("not a bank header: '{line}'"));
        }
        let bank = next_number::<i32>(&mut tokens, "bank number")?;
        let nchan = next_number::<usize>(&mut tokens, "channel count")?;
        let nrec = next_number::<usize>(&mut tokens, "record count")?;
        if nchan > MAX_CHANNELS {
            return Err(format!("bank {bank} declares {nchan} channels, limit is {MAX_CHANNELS}"));
        }
        let bin_token = tokens.next().ok_or("missing bin type")?;
        let bin_type =
            BinType::parse(bin_token).ok_or_else(|| format!("unknown bin type '{bin_token}'"))?;

        let mut coefficients = Vec::new();
        let mut value_type = ValueType::Std;
        for token in tokens {
            match token.parse::<f64>() {
                Ok(v) => coefficients.push(v),
                Err(_) => {
                    value_type = if token == "STD" { ValueType::Std } else { ValueType::Esd };
                    break;
                }
            }
        }
        Ok(BankHeader {
            bank,
            nchan,
            nrec,
            bin_type,
            coefficients,
            value_type,
        })
    }

    fn coef(&self, i: usize) -> Result<f64, String> {
        self.coefficients
            .get(i)
            .copied()
            .ok_or_else(|| format!("bank {} is missing binning coefficient {}", self.bank, i + 1))
    }

    /// Bin boundaries for this bank, looking time maps up in `maps`.
    pub fn x_scale(&self, maps: &TimeMaps) -> Result<XScale, String> {
        let n = self.nchan + 1;
        let scale = match self.bin_type {
            BinType::Cons | BinType::Cond | BinType::Conq => {
                let start = self.coef(0)?;
                let step = self.coef(1)?;
                XScale::uniform(start, start + step * self.nchan as f64, n)
            }
            BinType::Slog => {
                let start = self.coef(0)?;
                let ratio = 1.0 + self.coef(2)?;
                let mut edges = Vec::with_capacity(n);
                let mut x = start;
                for _ in 0..n {
                    edges.push(x);
                    x *= ratio;
                }
                XScale::variable(edges)
            }
            BinType::TimeMap => {
                let index = self.coef(0)? as usize;
                let map = maps.get(index).ok_or_else(|| {
                    format!("bank {} refers to unknown TIME_MAP {index}", self.bank)
                })?;
                let values = map.values();
                if values.len() >= n {
                    XScale::variable(values[..n].to_vec())
                } else if values.len() == self.nchan {
                    Ok(map.clone())
                } else {
                    return Err(format!(
                        "TIME_MAP {index} has {} boundaries, bank {} needs {n}",
                        values.len(),
                        self.bank
                    ));
                }
            }
        };
        scale.map_err(|e| format!("bank {}: {e}", self.bank))
    }
}

/// `TIME_MAP index nvals nrec TIME_MAP clock_ns`
#[derive(Debug, Clone, PartialEq)]
struct TimeMapHeader {
    index: usize,
    nvals: usize,
    nrec: usize,
    clock_us: f64,
}

impl TimeMapHeader {
    fn parse(line: &str) -> Result<Self, String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 6 {
            return Err(format!("short TIME_MAP header: '{line}'"));
        }
        let number = |i: usize, what: &str| -> Result<f64, String> {
            tokens[i]
                .parse::<f64>()
                .map_err(|_| format!("bad {what} '{}' in TIME_MAP header", tokens[i]))
        };
        Ok(TimeMapHeader {
            index: number(1, "map index")? as usize,
            nvals: number(2, "value count")? as usize,
            nrec: number(3, "record count")? as usize,
            clock_us: number(5, "clock width")? / 1000.0,
        })
    }
}

// ---------------------------------------------------------------------------
// Sparse time-map storage
// ---------------------------------------------------------------------------

/// Time maps keyed by their index; indices need not be contiguous.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeMaps(BTreeMap<usize, XScale>);

impl TimeMaps {
    pub fn get(&self, index: usize) -> Option<&XScale> {
        self.0.get(&index)
    }

    pub fn insert(&mut self, index: usize, scale: XScale) {
        self.0.insert(index, scale);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dense view from 0 up to the highest index, `None` where no map
    /// was defined.
    pub fn slots(&self) -> Vec<Option<&XScale>> {
        let top = match self.0.keys().next_back() {
            Some(&k) => k + 1,
            None => 0,
        };
        (0..top).map(|i| self.0.get(&i)).collect()
    }
}

/// Rebuild bin boundaries from `(channel, time, width)` triplets, filling
/// each segment up to the next triplet's channel and extending the last
/// segment with its width until `end` is reached. The result may hold at
/// most `MAX_CHANNELS + 1` boundaries.
pub fn time_map_scale(triplets: &[(f64, f64, f64)], end: f64, clock_us: f64) -> Result<XScale, String> {
    let mut edges = Vec::new();
    for (j, &(channel, time, width)) in triplets.iter().enumerate() {
        if !(width > 0.0 && width.is_finite()) {
            return Err(format!("bad bin width {width} in TIME_MAP"));
        }
        let count = match triplets.get(j + 1) {
            Some(&(next_channel, _, _)) => (next_channel - channel).max(0.0),
            None => ((end - time) / width).ceil().max(0.0),
        };
        if !count.is_finite() || count > (MAX_CHANNELS - edges.len()) as f64 {
            return Err(format!(
                "TIME_MAP segment at channel {channel} exceeds {} boundaries",
                MAX_CHANNELS + 1
            ));
        }
        let count = count as usize;
        match triplets.get(j + 1) {
            Some(_) => edges.extend((0..count).map(|k| time + k as f64 * width)),
            None => {
                edges.extend((0..count).map(|k| time + k as f64 * width).filter(|&x| x < end));
                edges.push(end);
            }
        }
    }
    XScale::variable(edges.into_iter().map(|x| x * clock_us).collect()).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Line reader with one line of push-back
// ---------------------------------------------------------------------------

struct Lines<R> {
    inner: R,
    pushed: Option<String>,
}

impl<R: BufRead> Lines<R> {
    fn new(inner: R) -> Self {
        Lines { inner, pushed: None }
    }

    fn next_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.pushed.take() {
            return Ok(Some(line));
        }
        let mut buf = String::new();
        if self.inner.read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    fn unread(&mut self, line: String) {
        self.pushed = Some(line);
    }

    /// Next line inside a record; running out of input is a content error.
    fn body_line(&mut self, what: &str) -> Result<String, RecordError> {
        match self.next_line() {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(RecordError::Malformed(format!("{what} truncated by end of file"))),
            Err(e) => Err(RecordError::Io(e)),
        }
    }
}

enum RecordError {
    /// The stream itself failed; stop scanning.
    Io(io::Error),
    /// Only this record is unusable.
    Malformed(String),
}

/// Split a line into fixed-width fields, stopping at the first blank one.
fn fixed_fields(line: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(width)
        .map(|c| c.iter().collect::<String>().trim().to_string())
        .take_while(|f| !f.is_empty())
        .collect()
}

fn parse_field(text: &str, what: &str) -> Result<f64, RecordError> {
    text.parse::<f64>()
        .map_err(|_| RecordError::Malformed(format!("bad {what} value '{text}'")))
}

fn next_number<'a, T: std::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<T, String> {
    let token = tokens.next().ok_or_else(|| format!("missing {what}"))?;
    token.parse::<T>().map_err(|_| format!("bad {what} '{token}'"))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Everything read from one GSAS stream.
#[derive(Debug, Default)]
pub struct GsasFile {
    pub title: String,
    pub iparm: Option<String>,
    pub time_maps: TimeMaps,
    pub banks: Vec<RawSpectrum>,
}

/// Read a GSAS stream. Problems are reported to `sink`; a failing stream
/// ends the scan but keeps the records read so far.
pub fn decode<R: BufRead>(reader: R, name: &str, sink: &dyn DiagnosticSink) -> GsasFile {
    let mut lines = Lines::new(reader);
    let mut file = GsasFile::default();

    match lines.next_line() {
        Ok(Some(title)) => file.title = title.trim().to_string(),
        Ok(None) => {
            sink.report(name, "empty GSAS file");
            return file;
        }
        Err(e) => {
            sink.report(name, &format!("read failed: {e}"));
            return file;
        }
    }

    match lines.next_line() {
        Ok(Some(line)) => {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix(IPARM_TAG) {
                file.iparm = Some(rest.trim().to_string());
            } else {
                lines.unread(line);
            }
        }
        Ok(None) => return file,
        Err(e) => {
            sink.report(name, &format!("read failed: {e}"));
            return file;
        }
    }

    loop {
        let line = match lines.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                sink.report(name, &format!("read failed, keeping records so far: {e}"));
                break;
            }
        };
        let trimmed = line.trim();
        let outcome = if trimmed.starts_with(TIME_MAP_TAG) {
            read_time_map(&mut lines, trimmed).map(|(index, scale)| {
                debug!("{name}: TIME_MAP {index} with {} boundaries", scale.len());
                file.time_maps.insert(index, scale);
            })
        } else if trimmed.starts_with(BANK_TAG) {
            read_bank(&mut lines, trimmed, &file.time_maps).map(|raw| file.banks.push(raw))
        } else {
            Ok(())
        };
        match outcome {
            Ok(()) => {}
            Err(RecordError::Malformed(reason)) => sink.report(name, &reason),
            Err(RecordError::Io(e)) => {
                sink.report(name, &format!("read failed, keeping records so far: {e}"));
                break;
            }
        }
    }
    file
}

fn read_time_map<R: BufRead>(
    lines: &mut Lines<R>,
    header: &str,
) -> Result<(usize, XScale), RecordError> {
    let header = TimeMapHeader::parse(header).map_err(RecordError::Malformed)?;
    let mut values = Vec::new();
    for _ in 0..header.nrec {
        let line = lines.body_line("TIME_MAP")?;
        for field in fixed_fields(&line, FIELD_WIDTH) {
            if values.len() < header.nvals {
                values.push(parse_field(&field, "TIME_MAP")?);
            }
        }
    }
    let num_triplets = header.nvals.saturating_sub(1) / 3;
    if num_triplets == 0 || values.len() <= num_triplets * 3 {
        return Err(RecordError::Malformed(format!(
            "TIME_MAP {} holds {} of {} values",
            header.index,
            values.len(),
            header.nvals
        )));
    }
    let triplets: Vec<(f64, f64, f64)> = values[..num_triplets * 3]
        .chunks(3)
        .map(|t| (t[0], t[1], t[2]))
        .collect();
    let end = values[num_triplets * 3];
    let scale = time_map_scale(&triplets, end, header.clock_us)
        .map_err(|e| RecordError::Malformed(format!("TIME_MAP {}: {e}", header.index)))?;
    Ok((header.index, scale))
}

fn read_bank<R: BufRead>(
    lines: &mut Lines<R>,
    header: &str,
    maps: &TimeMaps,
) -> Result<RawSpectrum, RecordError> {
    let header = BankHeader::parse(header).map_err(RecordError::Malformed)?;
    let what = format!("BANK {}", header.bank);
    let mut y = Vec::new();
    let mut errors = Vec::new();

    match header.value_type {
        ValueType::Std => {
            let mut record = 0;
            while y.len() < header.nchan {
                if record == header.nrec.max(header.nchan.div_ceil(STD_PER_LINE)) {
                    return Err(RecordError::Malformed(format!(
                        "{what} ended after {} of {} channels",
                        y.len(),
                        header.nchan
                    )));
                }
                let line = lines.body_line(&what)?;
                record += 1;
                for token in line.split_whitespace() {
                    if y.len() == header.nchan {
                        break;
                    }
                    y.push(parse_field(token, &what)?);
                }
            }
        }
        ValueType::Esd => {
            for _ in 0..header.nrec {
                if y.len() == header.nchan {
                    break;
                }
                let line = lines.body_line(&what)?;
                let fields = fixed_fields(&line, FIELD_WIDTH);
                for pair in fields.chunks(2).take(ESD_PAIRS_PER_LINE) {
                    if y.len() == header.nchan {
                        break;
                    }
                    let [value, sigma] = pair else {
                        return Err(RecordError::Malformed(format!("{what}: value without error")));
                    };
                    y.push(parse_field(value, &what)?);
                    errors.push(parse_field(sigma, &what)?);
                }
            }
            if y.len() < header.nchan {
                return Err(RecordError::Malformed(format!(
                    "{what} ended after {} of {} channels",
                    y.len(),
                    header.nchan
                )));
            }
        }
    }

    let x = header.x_scale(maps).map_err(RecordError::Malformed)?;
    let spectrum = match header.value_type {
        ValueType::Std => Spectrum::new(x, y, None, header.bank).map(Spectrum::with_sqrt_errors),
        ValueType::Esd => Spectrum::new(x, y, Some(errors), header.bank),
    }
    .map_err(|e| RecordError::Malformed(format!("{what}: {e}")))?;

    Ok(RawSpectrum {
        spectrum,
        x_units: header.bin_type.units().to_string(),
        y_units: "Counts".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

/// Serves the DataSets of one GSAS file, decoded at construction.
pub struct GsasRetriever {
    name: String,
    readable: bool,
    data_sets: Vec<(DataSetType, DataSet)>,
}

impl GsasRetriever {
    pub fn open(name: &str, sink: Arc<dyn DiagnosticSink>) -> Self {
        match File::open(name) {
            Ok(f) => Self::from_reader(name, BufReader::new(f), sink.as_ref(), &IparmCalibrator),
            Err(e) => {
                sink.report(name, &format!("cannot open: {e}"));
                GsasRetriever {
                    name: name.to_string(),
                    readable: false,
                    data_sets: Vec::new(),
                }
            }
        }
    }

    pub fn from_reader<R: BufRead>(
        name: &str,
        reader: R,
        sink: &dyn DiagnosticSink,
        calibrator: &dyn Calibrator,
    ) -> Self {
        let file = decode(reader, name, sink);
        if file.banks.is_empty() {
            sink.report(name, "could not load any bank");
        }

        let mut shared = Attributes::new();
        shared.insert(attr::RUN_TITLE.to_string(), file.title.clone().into());
        shared.insert(attr::FILE_NAME.to_string(), name.into());
        shared.insert(
            attr::INST_TYPE.to_string(),
            InstrumentType::TofDiffractometer.to_string().into(),
        );
        let mut data_sets = assemble(file.banks, &shared, &Titles::default());

        if let Some(iparm) = &file.iparm {
            let path = Path::new(name)
                .parent()
                .map(|dir| dir.join(iparm))
                .unwrap_or_else(|| iparm.into());
            for (_, ds) in data_sets.iter_mut().filter(|(ty, _)| *ty == DataSetType::Histogram) {
                ds.set_attribute(attr::GSAS_IPARM, iparm.as_str());
                if let Err(e) = calibrator.calibrate(ds, &path) {
                    sink.report(name, &format!("calibration from {} failed: {e}", path.display()));
                    ds.remove_attribute(attr::GSAS_IPARM);
                }
            }
        }

        GsasRetriever {
            name: name.to_string(),
            readable: true,
            data_sets,
        }
    }
}

impl Retriever for GsasRetriever {
    fn data_source_name(&self) -> &str {
        &self.name
    }

    fn num_data_sets(&mut self) -> i32 {
        if !self.readable {
            return status::BAD_FILE_NAME;
        }
        self.data_sets.len() as i32
    }

    fn get_type(&mut self, index: usize) -> DataSetType {
        self.data_sets
            .get(index)
            .map(|(ty, _)| *ty)
            .unwrap_or(DataSetType::Invalid)
    }

    fn get_data_set(&mut self, index: usize) -> Option<DataSet> {
        self.data_sets.get(index).map(|(_, ds)| ds.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::error::RetrieveError;
    use std::io::Cursor;

    fn fixed(values: &[&str]) -> String {
        values.iter().map(|v| format!("{v:>8}")).collect()
    }

    struct NoCalibration;

    impl Calibrator for NoCalibration {
        fn calibrate(&self, _ds: &mut DataSet, iparm: &Path) -> Result<(), RetrieveError> {
            Err(RetrieveError::content(&iparm.display().to_string(), "no such file"))
        }
    }

    #[test]
    fn time_map_with_high_index_leaves_gaps() {
        let text = format!(
            "title\nTIME_MAP       2        4        1 TIME_MAP      1000\n{}\n",
            fixed(&["1", "1000", "10", "1100"])
        );
        let sink = MemorySink::new();
        let file = decode(Cursor::new(text), "t.gsa", &sink);
        let slots = file.time_maps.slots();
        assert_eq!(slots.len(), 3);
        assert!(slots[0].is_none());
        assert!(slots[1].is_none());
        let expected: Vec<f64> = (0..=10).map(|k| 1000.0 + 10.0 * k as f64).collect();
        assert_eq!(slots[2].unwrap().values(), expected);
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn time_map_segments_follow_channels() {
        let scale = time_map_scale(&[(1.0, 100.0, 10.0), (4.0, 130.0, 20.0)], 190.0, 0.5).unwrap();
        assert_eq!(
            scale.values(),
            vec![50.0, 55.0, 60.0, 65.0, 75.0, 85.0, 95.0]
        );
    }

    #[test]
    fn esd_bank_stops_at_channel_count() {
        let text = format!(
            "title\nBANK 1 3 1 CONS 1000.0 10.0 0 0 ESD\n{}\n",
            fixed(&["5", "1", "6", "2", "7", "3", "8", "4", "9", "5"])
        );
        let sink = MemorySink::new();
        let file = decode(Cursor::new(text), "t.gsa", &sink);
        assert_eq!(file.banks.len(), 1);
        let s = &file.banks[0].spectrum;
        assert_eq!(s.y, vec![5.0, 6.0, 7.0]);
        assert_eq!(s.errors, Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(s.x.values(), vec![1000.0, 1010.0, 1020.0, 1030.0]);
    }

    #[test]
    fn std_bank_reads_tokens_and_sqrt_errors() {
        let text = "title\nBANK 2 4 1 COND 0.5 0.25 0 0 STD\n   4   9  16  25\n";
        let sink = MemorySink::new();
        let file = decode(Cursor::new(text), "t.gsa", &sink);
        let raw = &file.banks[0];
        assert_eq!(raw.x_units, "Angstroms");
        assert_eq!(raw.spectrum.group_id, 2);
        assert_eq!(raw.spectrum.errors, Some(vec![2.0, 3.0, 4.0, 5.0]));
    }

    #[test]
    fn malformed_bank_is_dropped_alone() {
        let text = format!(
            "title\nBANK 1 2 1 CONS 10 1 0 0 ESD\n{}\nBANK 2 2 1 CONS 10 1 0 0 ESD\n{}\n",
            fixed(&["1", "x", "2", "1"]),
            fixed(&["3", "1", "4", "2"])
        );
        let sink = MemorySink::new();
        let file = decode(Cursor::new(text), "t.gsa", &sink);
        assert_eq!(file.banks.len(), 1);
        assert_eq!(file.banks[0].spectrum.group_id, 2);
        assert!(sink.contains("BANK 1"));
    }

    #[test]
    fn bank_before_its_time_map_is_dropped() {
        let text = format!(
            "title\nBANK 1 2 1 TIME_MAP 1 ESD\n{}\nTIME_MAP       1        4        1 TIME_MAP      1000\n{}\n",
            fixed(&["1", "1", "2", "1"]),
            fixed(&["1", "10", "5", "20"])
        );
        let sink = MemorySink::new();
        let file = decode(Cursor::new(text), "t.gsa", &sink);
        assert!(file.banks.is_empty());
        assert!(file.time_maps.get(1).is_some());
        assert!(sink.contains("unknown TIME_MAP 1"));
    }

    #[test]
    fn oversized_bank_header_is_dropped_without_allocating() {
        let text = "title\nBANK 1 99999999999999 1 CONS 1000.0 10.0 0 0 STD\n 1 2 3\nBANK 2 2 1 CONS 10 1 0 0 STD\n 1 2\n";
        let sink = MemorySink::new();
        let file = decode(Cursor::new(text), "t.gsa", &sink);
        assert_eq!(file.banks.len(), 1);
        assert_eq!(file.banks[0].spectrum.group_id, 2);
        assert!(sink.contains("99999999999999"));
    }

    #[test]
    fn time_map_extrapolation_is_bounded() {
        let err = time_map_scale(&[(1.0, 0.0, 1.0e-9)], 1.0e9, 1.0).unwrap_err();
        assert!(err.contains("exceeds"));
        let err = time_map_scale(&[(1.0, 0.0, 1.0), (1.0e15, 0.0, 1.0)], 10.0, 1.0).unwrap_err();
        assert!(err.contains("exceeds"));
    }

    #[test]
    fn oversized_time_map_is_dropped_alone() {
        let text = format!(
            "title\nTIME_MAP       1        4        1 TIME_MAP      1000\n{}\nBANK 2 2 1 CONS 10 1 0 0 STD\n 1 2\n",
            fixed(&["1", "0", "0.00001", "1e12"])
        );
        let sink = MemorySink::new();
        let file = decode(Cursor::new(text), "t.gsa", &sink);
        assert!(file.time_maps.is_empty());
        assert_eq!(file.banks.len(), 1);
        assert!(sink.contains("TIME_MAP 1"));
    }

    /// Serves `data`, then fails every further read.
    struct FailsAfter(Cursor<Vec<u8>>);

    impl io::Read for FailsAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = io::Read::read(&mut self.0, buf)?;
            if n == 0 && !buf.is_empty() {
                return Err(io::Error::new(io::ErrorKind::Other, "device went away"));
            }
            Ok(n)
        }
    }

    impl BufRead for FailsAfter {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            if self.0.position() as usize >= self.0.get_ref().len() {
                return Err(io::Error::new(io::ErrorKind::Other, "device went away"));
            }
            self.0.fill_buf()
        }

        fn consume(&mut self, amt: usize) {
            self.0.consume(amt)
        }
    }

    #[test]
    fn stream_failure_keeps_banks_read_so_far() {
        let text = "title\nBANK 1 2 1 CONS 10 1 0 0 STD\n 1 2\nBANK 2 2 1 CONS 10 1 0 0 STD\n 3 4\n";
        let sink = MemorySink::new();
        let file = decode(FailsAfter(Cursor::new(text.as_bytes().to_vec())), "t.gsa", &sink);
        assert_eq!(file.banks.len(), 2);
        assert_eq!(file.banks[1].spectrum.y, vec![3.0, 4.0]);
        assert!(sink.contains("read failed"));
        assert!(sink.contains("device went away"));
    }

    #[test]
    fn second_line_without_tag_is_data() {
        let text = "title\nBANK 1 2 1 CONS 10 1 0 0 STD\n 1 2\n";
        let file = decode(Cursor::new(text), "t.gsa", &MemorySink::new());
        assert_eq!(file.iparm, None);
        assert_eq!(file.banks.len(), 1);
    }

    #[test]
    fn unreadable_file_reports_bad_file_name() {
        let sink = Arc::new(MemorySink::new());
        let mut r = GsasRetriever::open("/nonexistent/x.gsa", sink.clone());
        assert_eq!(r.num_data_sets(), status::BAD_FILE_NAME);
        assert_eq!(r.error_message(), "File Not Found");
        assert!(sink.contains("cannot open"));
    }

    #[test]
    fn failed_calibration_removes_iparm_attribute() {
        let text = format!(
            "run title\n{IPARM_TAG} inst.prm\nBANK 0 2 1 CONS 10 1 0 0 STD\n 1 2\nBANK 1 2 1 CONS 10 1 0 0 STD\n 3 4\n"
        );
        let sink = MemorySink::new();
        let mut r = GsasRetriever::from_reader("dir/t.gsa", Cursor::new(text), &sink, &NoCalibration);
        assert_eq!(r.num_data_sets(), 2);
        assert_eq!(r.get_type(0), DataSetType::Monitor);
        assert_eq!(r.get_type(1), DataSetType::Histogram);
        assert_eq!(r.get_type(2), DataSetType::Invalid);
        assert!(r.get_data_set(2).is_none());
        let sample = r.get_data_set(1).unwrap();
        assert!(sample.attribute(attr::GSAS_IPARM).is_none());
        assert_eq!(
            sample.attribute(attr::RUN_TITLE).and_then(|v| v.as_str()),
            Some("run title")
        );
        assert!(sink.contains("calibration"));
    }
}
