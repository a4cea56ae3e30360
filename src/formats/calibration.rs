//! GSAS instrument parameter (iparm) files.
//!
//! Only three record kinds are used, each starting with `INS`, the bank
//! number in columns 3..6 and the tag in columns 6..12:
//!
//! ```text
//! INS   FPATH1   9.0                      source-to-sample path (m)
//! INS  1 ICONS  7471.35  -3.52  -2.58     DIFC DIFA TZERO
//! INS  1BNKPAR  1.5300  148.00  ...       sample-to-detector path, 2θ (deg)
//! ```

use std::fs;
use std::path::Path;

use log::debug;

use crate::data::attr;
use crate::data::model::{AttributeValue, DataSet};
use crate::error::RetrieveError;

/// Attaches calibration attributes to the spectra of a DataSet.
pub trait Calibrator {
    fn calibrate(&self, ds: &mut DataSet, iparm: &Path) -> Result<(), RetrieveError>;
}

/// Reads ICONS, FPATH1 and BNKPAR records from an iparm file.
pub struct IparmCalibrator;

impl Calibrator for IparmCalibrator {
    fn calibrate(&self, ds: &mut DataSet, iparm: &Path) -> Result<(), RetrieveError> {
        let text = fs::read_to_string(iparm)?;
        apply(ds, &text);
        debug!("{}: calibrated {} spectra", iparm.display(), ds.len());
        Ok(())
    }
}

/// Apply every usable record in `text`; records naming a bank that has no
/// spectrum, or with unparsable numbers, are skipped.
pub fn apply(ds: &mut DataSet, text: &str) {
    let mut initial_path = 0.0;
    for line in text.lines() {
        let Some(record) = Record::parse(line) else {
            continue;
        };
        match record.tag.as_str() {
            "FPATH1" => {
                if let Some(&l1) = record.values.first() {
                    initial_path = l1;
                }
            }
            "ICONS" => {
                if record.values.len() < 3 {
                    continue;
                }
                if let Some(s) = record.bank.and_then(|b| ds.spectrum_by_group_mut(b)) {
                    s.set_attribute(
                        attr::GSAS_CALIB,
                        AttributeValue::FloatList(record.values[..3].to_vec()),
                    );
                }
            }
            "BNKPAR" => {
                if record.values.len() < 2 {
                    continue;
                }
                if let Some(s) = record.bank.and_then(|b| ds.spectrum_by_group_mut(b)) {
                    let (l2, two_theta) = (record.values[0], record.values[1]);
                    s.set_attribute(attr::INITIAL_PATH, initial_path);
                    s.set_attribute(
                        attr::DETECTOR_POS,
                        AttributeValue::cylindrical(l2, two_theta.to_radians(), 0.0),
                    );
                }
            }
            _ => {}
        }
    }
}

struct Record {
    bank: Option<i32>,
    tag: String,
    values: Vec<f64>,
}

impl Record {
    fn parse(line: &str) -> Option<Self> {
        if !line.starts_with("INS") {
            return None;
        }
        let column = |from: usize, to: usize| -> String {
            line.chars().skip(from).take(to - from).collect::<String>().trim().to_string()
        };
        let bank = column(3, 6).parse::<i32>().ok();
        let tag = column(6, 12);
        let values = line
            .chars()
            .skip(12)
            .collect::<String>()
            .split_whitespace()
            .map_while(|t| t.parse::<f64>().ok())
            .collect();
        Some(Record { bank, tag, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Spectrum, XScale};

    fn data_set() -> DataSet {
        let mut ds = DataSet::new("Sample", "Time(us)", "Time-of-flight");
        for group in [1, 2] {
            let x = XScale::uniform(1.0, 3.0, 3).unwrap();
            ds.spectra.push(Spectrum::new(x, vec![1.0, 2.0], None, group).unwrap());
        }
        ds
    }

    const IPARM: &str = "\
123456789012345678901234567890
INS   BANK      2
INS   FPATH1    9.000000
INS  1 ICONS   7471.35     -3.52     -2.58
INS  1BNKPAR    1.5300   148.000     0.000
INS  7 ICONS   1000.00      0.00      0.00
INS  2 ICONS   oops
";

    #[test]
    fn icons_and_bnkpar_land_on_matching_bank() {
        let mut ds = data_set();
        apply(&mut ds, IPARM);
        let s1 = ds.spectrum_by_group(1).unwrap();
        assert_eq!(
            s1.attribute(attr::GSAS_CALIB),
            Some(&AttributeValue::FloatList(vec![7471.35, -3.52, -2.58]))
        );
        assert_eq!(s1.attribute(attr::INITIAL_PATH).and_then(|v| v.as_f64()), Some(9.0));
        let Some(AttributeValue::Position { x, y, z }) = s1.attribute(attr::DETECTOR_POS) else {
            panic!("missing detector position");
        };
        let angle = 148.0_f64.to_radians();
        assert!((x - 1.53 * angle.cos()).abs() < 1e-12);
        assert!((y - 1.53 * angle.sin()).abs() < 1e-12);
        assert_eq!(*z, 0.0);

        let s2 = ds.spectrum_by_group(2).unwrap();
        assert!(s2.attribute(attr::GSAS_CALIB).is_none());
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut ds = data_set();
        let err = IparmCalibrator.calibrate(&mut ds, Path::new("/nonexistent/inst.prm"));
        assert!(err.is_err());
    }
}
