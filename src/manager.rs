use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::Engine;
use anyhow::{Context, Result, bail};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Manages the Monte Carlo replicate runs stored under one simulation
/// directory: each `create` call adds a `run-NNNN` directory holding the
/// run's output series, and `analyze` aggregates the observables over all
/// of them.
pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    pub fn create_run(&self) -> Result<()> {
        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;

        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        // Offset a configured seed per run so replicates differ.
        let mut cfg = self.cfg.clone();
        if let Some(seed) = cfg.run.seed {
            cfg.run.seed = Some(seed.wrapping_add(run_idx as u64));
        }

        let mut engine = Engine::generate_initial_condition(cfg)
            .context("failed to generate initial condition")?;

        engine.run_simulation().context("failed to run simulation")?;

        engine
            .save_series(self.series_file(run_idx))
            .context("failed to save series")?;

        Ok(())
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        if n_runs == 0 {
            bail!("no runs found in {:?}", self.sim_dir);
        }

        let mut analyzer = Analyzer::new();
        for run_idx in 0..n_runs {
            analyzer
                .add_file(self.series_file(run_idx))
                .context("failed to add file")?;
        }

        let results_file = self.results_file();
        analyzer
            .save_results(&results_file)
            .context("failed to save results")?;
        log::info!("wrote {results_file:?}");

        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let run_dir = self.run_dir(run_idx);
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }

        let results_file = self.results_file();
        if results_file.exists() {
            fs::remove_file(&results_file)
                .with_context(|| format!("failed to remove {results_file:?}"))?;
            log::info!("removed {results_file:?}");
        }

        Ok(())
    }

    fn count_run_dirs(&self) -> Result<usize> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let count = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .count();
        Ok(count)
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn series_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("series.msgpack")
    }

    fn results_file(&self) -> PathBuf {
        self.sim_dir.join("results.json")
    }
}
