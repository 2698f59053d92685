use crate::model::{Payoffs, State};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub disease: DiseaseConfig,
    pub decision: DecisionConfig,
    pub init: InitConfig,
    pub run: RunConfig,
}

/// Continuous-time disease rates, converted to per-step probabilities at setup.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DiseaseConfig {
    /// Transmission rate towards Susceptible contacts.
    pub beta_s: f64,
    /// Transmission rate towards Protected contacts.
    pub beta_p: f64,
    /// Recovery rate.
    pub gamma: f64,
}

/// Parameters of the protective-decision layer.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Continuous rate at which decision events fire.
    pub rate: f64,
    /// How many steps ahead an agent reasons when deciding.
    pub horizon: usize,
    /// Per-compartment payoffs accrued per unit of time.
    pub payoffs: Payoffs,
}

/// Initial per-compartment population counts.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    pub susceptible: usize,
    pub protected: usize,
    pub infected: usize,
    pub recovered: usize,
}

impl InitConfig {
    /// Counts in compartment order (S, P, I, R).
    pub fn counts(&self) -> [usize; State::COUNT] {
        [self.susceptible, self.protected, self.infected, self.recovered]
    }

    pub fn total(&self) -> usize {
        self.counts().iter().sum()
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Upper bound on the number of micro-steps.
    pub time_steps: usize,
    /// Seed for the random number generator; absent means OS entropy.
    pub seed: Option<u64>,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config =
            toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_num(self.disease.beta_s, 0.0..100.0).context("invalid transmission rate beta_s")?;
        check_num(self.disease.beta_p, 0.0..100.0).context("invalid transmission rate beta_p")?;
        check_num(self.disease.gamma, 0.0..100.0).context("invalid recovery rate gamma")?;

        check_num(self.decision.rate, 0.0..100.0).context("invalid decision rate")?;
        check_num(self.decision.horizon, 1..100_000).context("invalid decision horizon")?;
        check_payoffs(&self.decision.payoffs).context("invalid payoffs")?;

        // The event sampler draws 4 distinct agents per step, so smaller
        // populations cannot be simulated.
        check_num(self.init.total(), 4..10_000_000)
            .context("invalid total population size")?;

        check_num(self.run.time_steps, 1..1_000_000_000).context("invalid step budget")?;

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_payoffs(payoffs: &Payoffs) -> Result<()> {
    for state in State::ALL {
        let val = payoffs.for_state(state);
        if !val.is_finite() {
            bail!("payoff for {state:?} must be finite, but is {val}");
        }
    }
    Ok(())
}
