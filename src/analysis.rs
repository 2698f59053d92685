use crate::model::Record;
use crate::stats::Accumulator;
use anyhow::{Context, Result, bail};
use rmp_serde::decode;
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

/// Scalar observable aggregated across Monte Carlo replicate runs.
pub trait Obs {
    fn update(&mut self, series: &[Record]) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

/// Highest Infected fraction reached over a run.
pub struct PeakPrevalence {
    acc: Accumulator,
}

impl PeakPrevalence {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for PeakPrevalence {
    fn update(&mut self, series: &[Record]) -> Result<()> {
        let peak = series.iter().map(|rec| rec.frac_i).fold(0.0, f64::max);
        self.acc.add(peak);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "peak_prevalence": self.acc.report() })
    }
}

/// Final Recovered fraction of a run, i.e. the fraction of the population
/// the epidemic ever reached.
pub struct AttackRate {
    acc: Accumulator,
}

impl AttackRate {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for AttackRate {
    fn update(&mut self, series: &[Record]) -> Result<()> {
        let last = series.last().context("series has no records")?;
        self.acc.add(last.frac_r);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "attack_rate": self.acc.report() })
    }
}

/// Length of a run in completed reporting cycles.
pub struct RunLength {
    acc: Accumulator,
}

impl RunLength {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for RunLength {
    fn update(&mut self, series: &[Record]) -> Result<()> {
        let last = series.last().context("series has no records")?;
        self.acc.add(last.cycle as f64);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "run_length": self.acc.report() })
    }
}

/// Aggregates the observables over every saved run series.
pub struct Analyzer {
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new() -> Self {
        let mut obs_ptr_vec: Vec<Box<dyn Obs>> = Vec::new();
        obs_ptr_vec.push(Box::new(PeakPrevalence::new()));
        obs_ptr_vec.push(Box::new(AttackRate::new()));
        obs_ptr_vec.push(Box::new(RunLength::new()));
        Self { obs_ptr_vec }
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        let series: Vec<Record> =
            decode::from_read(&mut reader).context("failed to read series")?;
        if series.is_empty() {
            bail!("series contains no records");
        }

        for obs in &mut self.obs_ptr_vec {
            obs.update(&series).context("failed to update observable")?;
        }
        Ok(())
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);

        let reports: Vec<_> = self.obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        serde_json::to_writer_pretty(writer, &reports)?;
        Ok(())
    }
}
