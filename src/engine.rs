use crate::config::Config;
use crate::model::{
    DecisionStrategy, DiseaseProbs, ExpectedUtility, Population, Record, RunningCounts, State,
    prob_from_rate,
};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Uniform};
use rmp_serde::encode;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Bound on the rejection-sampling loop drawing distinct agent indices, so
/// degenerate populations fail instead of spinning.
const MAX_SAMPLE_ATTEMPTS: usize = 1 << 16;

/// Simulation engine.
///
/// Owns the population, the converted transition probabilities, the running
/// per-compartment census, and the random number generator, and drives the
/// micro-step loop. Each micro-step performs one interaction, one gated
/// protective decision, and one recovery event on four independently drawn
/// distinct agents, and feeds the census into the windowed output series.
pub struct Engine {
    time_steps: usize,
    population: Population,
    counts: RunningCounts,
    strategy: Box<dyn DecisionStrategy>,
    decision_gate: Bernoulli,
    index_dist: Uniform<usize>,
    /// Infected fraction observed at the end of the previous step.
    prevalence: f64,
    t: usize,
    cycle: usize,
    elapsed: usize,
    accum: [u64; State::COUNT],
    series: Vec<Record>,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` with a freshly initialized population.
    ///
    /// Seeds the generator from the configuration when a seed is given, from
    /// OS entropy otherwise.
    pub fn generate_initial_condition(cfg: Config) -> Result<Self> {
        let rng = match cfg.run.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };
        Self::from_rng(cfg, rng)
    }

    fn from_rng(cfg: Config, rng: ChaCha12Rng) -> Result<Self> {
        let n = cfg.init.total();
        if n < 4 {
            bail!("population must contain at least 4 agents, but has {n}");
        }

        let probs =
            DiseaseProbs::from_rates(cfg.disease.beta_s, cfg.disease.beta_p, cfg.disease.gamma);
        let decision_prob = prob_from_rate(cfg.decision.rate);

        let population = Population::from_counts(
            cfg.init.counts(),
            probs,
            cfg.decision.horizon,
            cfg.decision.payoffs,
        );
        let counts = RunningCounts::new(cfg.init.counts());
        let prevalence = counts.fraction(State::Infected);
        let series = vec![Record::from_census(0, &counts)];

        Ok(Self {
            time_steps: cfg.run.time_steps,
            population,
            counts,
            strategy: Box::new(ExpectedUtility),
            decision_gate: Bernoulli::new(decision_prob)?,
            index_dist: Uniform::new(0, n)?,
            prevalence,
            t: 1,
            cycle: 1,
            elapsed: 0,
            accum: [0; State::COUNT],
            series,
            rng,
        })
    }

    /// Run the micro-simulation until the step budget is exhausted or the
    /// disease goes extinct, and return the output series.
    pub fn run_simulation(&mut self) -> Result<&[Record]> {
        while self.t < self.time_steps && self.prevalence > 0.0 {
            self.perform_step().context("failed to perform step")?;
        }

        log::info!(
            "finished at step {} after {} reporting cycles (prevalence {:.4})",
            self.t,
            self.series.len() - 1,
            self.prevalence
        );

        Ok(&self.series)
    }

    /// Write the output series to a MessagePack file.
    pub fn save_series<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self.series).context("failed to serialize series")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    fn perform_step(&mut self) -> Result<()> {
        log::debug!("timestep {}", self.t);

        let targets = self
            .sample_distinct_targets()
            .context("failed to sample event targets")?;

        // Interaction: targets[0] is exposed by the current state of
        // targets[1]; the partner itself is never mutated.
        let partner_state = self.population.state_of(targets[1]);
        let agent = self.population.agent_mut(targets[0]);
        let pre = agent.state();
        let post = agent.interact(partner_state, &mut self.rng);
        if post != pre {
            log::trace!("agent {} infected by agent {}", agent.id(), targets[1]);
        }
        self.counts.record_transition(pre, post);

        // Decision, gated by the converted decision probability. Uses the
        // prevalence observed at the end of the previous step.
        if self.decision_gate.sample(&mut self.rng) {
            let agent = self.population.agent_mut(targets[2]);
            let pre = agent.state();
            let post = agent.decide(self.prevalence, self.strategy.as_ref());
            self.counts.record_transition(pre, post);
        }

        // Recovery.
        let agent = self.population.agent_mut(targets[3]);
        let pre = agent.state();
        let post = agent.recover(&mut self.rng);
        self.counts.record_transition(pre, post);

        self.aggregate();

        self.prevalence = self.counts.fraction(State::Infected);
        self.t += 1;

        Ok(())
    }

    /// Accumulate the census into the current reporting window and emit one
    /// record per completed window of N micro-steps.
    fn aggregate(&mut self) {
        for state in State::ALL {
            self.accum[state.index()] += self.counts.get(state) as u64;
        }
        self.elapsed += 1;

        let n = self.population.len();
        if self.elapsed == n {
            self.series
                .push(Record::from_window(self.cycle, self.accum, n, self.elapsed));
            self.accum = [0; State::COUNT];
            self.elapsed = 0;
            self.cycle += 1;
        }
    }

    /// Draw 4 pairwise-distinct agent indices uniformly at random, rejecting
    /// duplicates. The four slots are interaction initiator, interaction
    /// partner, decision maker, and recovery candidate, in that order.
    fn sample_distinct_targets(&mut self) -> Result<[usize; 4]> {
        let mut targets = [0usize; 4];
        let mut drawn = 0;
        let mut attempts = 0;
        while drawn < targets.len() {
            if attempts >= MAX_SAMPLE_ATTEMPTS {
                bail!(
                    "failed to draw {} distinct agents in {MAX_SAMPLE_ATTEMPTS} attempts",
                    targets.len()
                );
            }
            attempts += 1;

            let idx = self.index_dist.sample(&mut self.rng);
            if !targets[..drawn].contains(&idx) {
                targets[drawn] = idx;
                drawn += 1;
            }
        }
        Ok(targets)
    }
}
