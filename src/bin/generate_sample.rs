use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use neutron_retrieve::formats::gsas::IPARM_TAG;
use neutron_retrieve::formats::runfile::{Detector, RunHeader, RunTable, Subgroup};

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Peaks on a flat background plus gaussian noise, clamped at zero.
fn counts(xs: &[f64], peaks: &[(f64, f64, f64)], background: f64, rng: &mut SimpleRng) -> Vec<f64> {
    xs.iter()
        .map(|&x| {
            let signal: f64 = peaks
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(x, mu, sigma, amp))
                .sum();
            (background + signal + rng.gauss(0.0, background.sqrt())).max(0.0).round()
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

// ---------------------------------------------------------------------------
// GSAS
// ---------------------------------------------------------------------------

/// Two time-mapped ESD banks and one constant-step STD bank, plus the
/// matching instrument parameter file.
fn write_gsas(dir: &Path, rng: &mut SimpleRng) -> Result<PathBuf> {
    // (channel, time, width) in 1 µs clock ticks, then the end time
    let triplets = [(1, 1000, 10), (51, 1500, 20)];
    let end = 3500;
    let mut edges: Vec<f64> = (0..50).map(|k| 1000.0 + 10.0 * k as f64).collect();
    edges.extend((0..100).map(|k| 1500.0 + 20.0 * k as f64));
    edges.push(end as f64);
    let nchan = edges.len() - 1;
    let centres: Vec<f64> = edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();

    let mut text = String::new();
    writeln!(text, "SEPD sample generated by generate_sample")?;
    writeln!(text, "{IPARM_TAG} sepd.prm")?;

    let values: Vec<i64> = triplets
        .iter()
        .flat_map(|&(c, t, w)| [c, t, w])
        .chain([end])
        .collect();
    writeln!(
        text,
        "TIME_MAP {:>7} {:>7} {:>7} TIME_MAP {:>7}",
        1,
        values.len(),
        values.len().div_ceil(10),
        1000
    )?;
    for line in values.chunks(10) {
        writeln!(text, "{}", line.iter().map(|v| format!("{v:>8}")).collect::<String>())?;
    }

    for (bank, peaks) in [(1, [(1800.0, 30.0, 400.0)]), (2, [(2600.0, 45.0, 250.0)])] {
        let y = counts(&centres, &peaks, 40.0, rng);
        writeln!(text, "BANK {bank} {nchan} {} TIME_MAP 1 ESD", nchan.div_ceil(5))?;
        for pairs in y.chunks(5) {
            let line: String = pairs
                .iter()
                .map(|&v| format!("{v:>8.1}{:>8.2}", v.max(1.0).sqrt()))
                .collect();
            writeln!(text, "{line}")?;
        }
    }

    let xs: Vec<f64> = (0..100).map(|k| 1000.0 + 20.0 * k as f64 + 10.0).collect();
    let y = counts(&xs, &[(2000.0, 60.0, 300.0)], 25.0, rng);
    writeln!(text, "BANK 3 100 10 CONS 1000.0 20.0 0 0 STD")?;
    for line in y.chunks(10) {
        writeln!(text, "{}", line.iter().map(|v| format!("{v:>8.0}")).collect::<String>())?;
    }

    let path = dir.join("sepd_sample.gsa");
    fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;

    let iparm = "\
INS   FPATH1    14.000000
INS  1 ICONS   7471.35     -3.52     -2.58
INS  1BNKPAR    1.5300   148.000     0.000
INS  2 ICONS   5240.10     -1.20      0.85
INS  2BNKPAR    1.4800    90.000     0.000
INS  3 ICONS   3118.80      0.00      1.10
INS  3BNKPAR    1.6000    44.000     0.000
";
    fs::write(dir.join("sepd.prm"), iparm).context("writing sepd.prm")?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Columnar logs
// ---------------------------------------------------------------------------

struct LogColumns {
    time: Vec<f64>,
    temp: Vec<f64>,
    temp_err: Vec<f64>,
    monitor: Vec<f64>,
}

fn log_columns(rng: &mut SimpleRng) -> LogColumns {
    let time: Vec<f64> = (0..120).map(|i| i as f64 * 30.0).collect();
    LogColumns {
        temp: time.iter().map(|t| 295.0 - 0.02 * t + rng.gauss(0.0, 0.1)).collect(),
        temp_err: vec![0.1; time.len()],
        monitor: time.iter().map(|_| 1.0e4 + rng.gauss(0.0, 100.0).round()).collect(),
        time,
    }
}

fn write_csv(dir: &Path, log: &LogColumns) -> Result<PathBuf> {
    let path = dir.join("temperature_log.csv");
    let mut writer = csv::Writer::from_path(&path).context("creating CSV")?;
    writer.write_record(["time (s)", "temp (K)", "temp_err", "monitor"])?;
    for i in 0..log.time.len() {
        writer.write_record(&[
            log.time[i].to_string(),
            format!("{:.3}", log.temp[i]),
            log.temp_err[i].to_string(),
            log.monitor[i].to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(path)
}

fn write_parquet(dir: &Path, log: &LogColumns) -> Result<PathBuf> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("time (s)", DataType::Float64, false),
        Field::new("temp (K)", DataType::Float64, false),
        Field::new("temp_err", DataType::Float64, false),
        Field::new("monitor", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from(log.time.clone())),
        Arc::new(Float64Array::from(log.temp.clone())),
        Arc::new(Float64Array::from(log.temp_err.clone())),
        Arc::new(Float64Array::from(log.monitor.clone())),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).context("building record batch")?;

    let path = dir.join("temperature_log.parquet");
    let file = fs::File::create(&path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Run file
// ---------------------------------------------------------------------------

/// A direct-geometry spectrometer run: two monitors in histogram 1 and
/// eight detector groups in histogram 2.
fn write_run(dir: &Path, rng: &mut SimpleRng) -> Result<PathBuf> {
    let mut table = RunTable {
        header: RunHeader {
            run_title: "V rod 300K".into(),
            run_number: 2447,
            end_date: "19-OCT-26".into(),
            end_time: "14:02:11".into(),
            num_pulses: 1_080_000,
            source_to_sample: 8.0,
            source_to_sample_time: 1650.0,
            energy_in: 120.0,
        },
        num_histograms: 2,
        ..RunTable::default()
    };
    let edges: Vec<f64> = (0..=200).map(|k| 1000.0 + 25.0 * k as f64).collect();
    let centres: Vec<f64> = edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
    table.time_fields.insert(1, edges);

    for det in 1..=18 {
        table.detectors.insert(
            det,
            Detector {
                angle: 10.0 * det as f64,
                raw_angle: 10.0 * det as f64 - 0.3,
                height: 0.05 * (det % 3) as f64,
                flight_path: 4.0,
            },
        );
    }
    for (group, det) in [(1, 1), (2, 2)] {
        table.subgroups.insert(
            group,
            Subgroup {
                histogram: 1,
                beam_monitor: true,
                detector_ids: vec![det],
                time_field: 1,
                counts: counts(&centres, &[(2200.0 + 800.0 * group as f64, 40.0, 5000.0)], 10.0, rng),
            },
        );
    }
    for group in 3..=10 {
        let first = 2 * group - 3;
        table.subgroups.insert(
            group,
            Subgroup {
                histogram: 2,
                beam_monitor: false,
                detector_ids: vec![first, first + 1],
                time_field: 1,
                counts: counts(&centres, &[(4000.0, 120.0, 80.0)], 5.0, rng),
            },
        );
    }

    let path = dir.join("hrcs2447.run");
    table
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn main() -> Result<()> {
    let dir = PathBuf::from(std::env::args().nth(1).unwrap_or_else(|| "sample_data".into()));
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut rng = SimpleRng::new(42);

    let log = log_columns(&mut rng);
    let written = [
        write_gsas(&dir, &mut rng)?,
        write_csv(&dir, &log)?,
        write_parquet(&dir, &log)?,
        write_run(&dir, &mut rng)?,
    ];
    for path in &written {
        println!("Wrote {}", path.display());
    }
    Ok(())
}
