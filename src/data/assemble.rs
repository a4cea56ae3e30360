use super::attr;
use super::model::{Attributes, DataSet, Spectrum};
use crate::retriever::DataSetType;

/// A decoded spectrum tagged with the units it was recorded in.
#[derive(Debug, Clone)]
pub struct RawSpectrum {
    pub spectrum: Spectrum,
    pub x_units: String,
    pub y_units: String,
}

/// Titles used for the DataSets built by [`assemble`].
#[derive(Debug, Clone)]
pub struct Titles<'a> {
    pub monitor: &'a str,
    pub sample: &'a str,
}

impl Default for Titles<'_> {
    fn default() -> Self {
        Titles {
            monitor: "Monitor",
            sample: "Sample",
        }
    }
}

/// Axis label for a unit name.
pub fn unit_label(units: &str) -> String {
    match units {
        "Counts" => "Scattering Intensity".to_string(),
        "Time(us)" => "Time-of-flight".to_string(),
        "Inverse Angstroms" => "Q".to_string(),
        "Angstroms" => "d-spacing".to_string(),
        other => other.to_string(),
    }
}

/// Group raw spectra into DataSets.
///
/// Group id 0 spectra go to one monitor DataSet, placed first. The rest
/// form one DataSet per distinct (x units, y units) pair in the order the
/// units were first seen. `shared` is copied onto every DataSet and every
/// spectrum.
pub fn assemble(
    raw: Vec<RawSpectrum>,
    shared: &Attributes,
    titles: &Titles<'_>,
) -> Vec<(DataSetType, DataSet)> {
    let mut monitor: Option<DataSet> = None;
    let mut samples: Vec<((String, String), DataSet)> = Vec::new();

    for RawSpectrum { mut spectrum, x_units, y_units } in raw {
        for (name, value) in shared {
            spectrum.attributes.entry(name.clone()).or_insert_with(|| value.clone());
        }
        if spectrum.group_id == 0 {
            monitor
                .get_or_insert_with(|| {
                    let mut ds = new_data_set(titles.monitor, &x_units, &y_units);
                    ds.set_attribute(attr::DS_TYPE, attr::MONITOR_DATA);
                    ds
                })
                .spectra
                .push(spectrum);
            continue;
        }
        let key = (x_units, y_units);
        match samples.iter_mut().find(|(k, _)| *k == key) {
            Some((_, ds)) => ds.spectra.push(spectrum),
            None => {
                let mut ds = new_data_set(titles.sample, &key.0, &key.1);
                ds.set_attribute(attr::DS_TYPE, attr::SAMPLE_DATA);
                ds.spectra.push(spectrum);
                samples.push((key, ds));
            }
        }
    }

    let mut out = Vec::with_capacity(samples.len() + 1);
    if let Some(ds) = monitor {
        out.push((DataSetType::Monitor, ds));
    }
    out.extend(samples.into_iter().map(|(_, ds)| (DataSetType::Histogram, ds)));
    for (_, ds) in &mut out {
        for (name, value) in shared {
            ds.attributes.insert(name.clone(), value.clone());
        }
    }
    out
}

fn new_data_set(title: &str, x_units: &str, y_units: &str) -> DataSet {
    let mut ds = DataSet::new(title, x_units, &unit_label(x_units));
    ds.y_units = y_units.to_string();
    ds.y_label = unit_label(y_units);
    ds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::XScale;

    fn raw(group_id: i32, x_units: &str) -> RawSpectrum {
        let x = XScale::variable(vec![1.0, 2.0, 3.0]).unwrap();
        RawSpectrum {
            spectrum: Spectrum::new(x, vec![1.0, 1.0], None, group_id).unwrap(),
            x_units: x_units.to_string(),
            y_units: "Counts".to_string(),
        }
    }

    #[test]
    fn monitors_first_then_units_in_first_seen_order() {
        let mut shared = Attributes::new();
        shared.insert(attr::RUN_TITLE.to_string(), "run".into());
        let out = assemble(
            vec![
                raw(1, "Angstroms"),
                raw(0, "Time(us)"),
                raw(2, "Time(us)"),
                raw(3, "Angstroms"),
            ],
            &shared,
            &Titles::default(),
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].0, DataSetType::Monitor);
        assert_eq!(out[0].1.title, "Monitor");
        assert_eq!(out[1].1.x_units, "Angstroms");
        assert_eq!(out[1].1.x_label, "d-spacing");
        assert_eq!(out[1].1.spectra.iter().map(|s| s.group_id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(out[2].1.x_units, "Time(us)");
        assert!(out[2].1.spectra[0].attribute(attr::RUN_TITLE).is_some());
        assert_eq!(
            out[1].1.attribute(attr::DS_TYPE).and_then(|v| v.as_str()),
            Some(attr::SAMPLE_DATA)
        );
    }

    #[test]
    fn nothing_in_nothing_out() {
        assert!(assemble(Vec::new(), &Attributes::new(), &Titles::default()).is_empty());
    }
}
