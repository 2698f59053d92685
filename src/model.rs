use rand::Rng;
use serde::{Deserialize, Serialize};

/// Epidemiological compartment of an agent.
///
/// Every agent is in exactly one compartment at any time. `Recovered` is
/// terminal: no transition ever leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Susceptible,
    Protected,
    Infected,
    Recovered,
}

impl State {
    pub const COUNT: usize = 4;

    pub const ALL: [State; State::COUNT] = [
        State::Susceptible,
        State::Protected,
        State::Infected,
        State::Recovered,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Convert a continuous-time rate into a per-micro-step transition probability.
///
/// Callers must pass a non-negative rate; the result is then in `[0, 1)`.
pub fn prob_from_rate(rate: f64) -> f64 {
    1.0 - (-rate).exp()
}

/// Per-micro-step disease transition probabilities, already converted from
/// continuous rates via [`prob_from_rate`].
#[derive(Debug, Clone, Copy)]
pub struct DiseaseProbs {
    /// Infection probability per contact with an Infected partner, while Susceptible.
    pub beta_s: f64,
    /// Infection probability per contact with an Infected partner, while Protected.
    pub beta_p: f64,
    /// Recovery probability per recovery event.
    pub gamma: f64,
}

impl DiseaseProbs {
    pub fn from_rates(beta_s: f64, beta_p: f64, gamma: f64) -> Self {
        Self {
            beta_s: prob_from_rate(beta_s),
            beta_p: prob_from_rate(beta_p),
            gamma: prob_from_rate(gamma),
        }
    }
}

/// Per-compartment payoffs accrued per unit of time, used by the decision rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Payoffs {
    pub susceptible: f64,
    pub protected: f64,
    pub infected: f64,
    pub recovered: f64,
}

impl Payoffs {
    pub fn for_state(&self, state: State) -> f64 {
        match state {
            State::Susceptible => self.susceptible,
            State::Protected => self.protected,
            State::Infected => self.infected,
            State::Recovered => self.recovered,
        }
    }
}

/// Rule deciding whether an at-risk agent adopts or drops protection.
///
/// Implementations must return either `Susceptible` or `Protected`.
pub trait DecisionStrategy {
    fn choose(
        &self,
        prevalence: f64,
        probs: &DiseaseProbs,
        payoffs: &Payoffs,
        horizon: usize,
    ) -> State;
}

/// Default decision rule: compare the expected accumulated payoff of staying
/// Susceptible against staying Protected over the time horizon.
///
/// While in state X the per-step infection probability is `prevalence * beta_X`,
/// so the expected healthy time before infection is `1 / (prevalence * beta_X)`,
/// truncated at the horizon. Time spent healthy accrues the state's payoff and
/// the remainder accrues the Infected payoff. Ties keep Susceptible.
pub struct ExpectedUtility;

impl DecisionStrategy for ExpectedUtility {
    fn choose(
        &self,
        prevalence: f64,
        probs: &DiseaseProbs,
        payoffs: &Payoffs,
        horizon: usize,
    ) -> State {
        let horizon = horizon as f64;

        let utility = |state: State, beta: f64| {
            let p_inf = prevalence * beta;
            let healthy = if p_inf > 0.0 {
                (1.0 / p_inf).min(horizon)
            } else {
                horizon
            };
            payoffs.for_state(state) * healthy + payoffs.infected * (horizon - healthy)
        };

        let u_s = utility(State::Susceptible, probs.beta_s);
        let u_p = utility(State::Protected, probs.beta_p);

        if u_p > u_s {
            State::Protected
        } else {
            State::Susceptible
        }
    }
}

/// One individual of the simulated population.
///
/// The agent's state is mutated only by its own transition operations; each
/// operation returns the state after the attempted transition, unchanged when
/// no transition occurred.
pub struct Agent {
    id: usize,
    state: State,
    probs: DiseaseProbs,
    horizon: usize,
    payoffs: Payoffs,
}

impl Agent {
    pub fn new(
        id: usize,
        state: State,
        probs: DiseaseProbs,
        horizon: usize,
        payoffs: Payoffs,
    ) -> Self {
        Self {
            id,
            state,
            probs,
            horizon,
            payoffs,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// One directed contact in which this agent is potentially exposed by a
    /// partner in `other`. Only Susceptible and Protected agents are at risk,
    /// and only against an Infected partner.
    pub fn interact(&mut self, other: State, rng: &mut impl Rng) -> State {
        if other == State::Infected {
            let beta = match self.state {
                State::Susceptible => Some(self.probs.beta_s),
                State::Protected => Some(self.probs.beta_p),
                State::Infected | State::Recovered => None,
            };
            if let Some(beta) = beta {
                if rng.random::<f64>() < beta {
                    self.state = State::Infected;
                }
            }
        }
        self.state
    }

    /// Re-evaluate the protective choice given the observed Infected
    /// prevalence. Only Susceptible and Protected agents may switch; the
    /// stochastic decision gate is applied by the caller.
    pub fn decide(&mut self, prevalence: f64, strategy: &dyn DecisionStrategy) -> State {
        if matches!(self.state, State::Susceptible | State::Protected) {
            self.state = strategy.choose(prevalence, &self.probs, &self.payoffs, self.horizon);
        }
        self.state
    }

    /// Recover with probability gamma; applies only to Infected agents.
    pub fn recover(&mut self, rng: &mut impl Rng) -> State {
        if self.state == State::Infected && rng.random::<f64>() < self.probs.gamma {
            self.state = State::Recovered;
        }
        self.state
    }
}

/// The full ordered population, fixed in size for the whole run.
pub struct Population {
    agents: Vec<Agent>,
}

impl Population {
    /// Build the population from per-state counts, assigning sequential ids
    /// in compartment order (S, P, I, R).
    pub fn from_counts(
        counts: [usize; State::COUNT],
        probs: DiseaseProbs,
        horizon: usize,
        payoffs: Payoffs,
    ) -> Self {
        // State buckets are a construction-time convenience only; agents
        // migrate between compartments afterwards without bucket maintenance.
        let mut buckets: [Vec<usize>; State::COUNT] = Default::default();

        let mut agents = Vec::with_capacity(counts.iter().sum());
        let mut id = 0;
        for (state, count) in State::ALL.into_iter().zip(counts) {
            for _ in 0..count {
                buckets[state.index()].push(id);
                agents.push(Agent::new(id, state, probs, horizon, payoffs));
                id += 1;
            }
        }

        for state in State::ALL {
            log::debug!(
                "seeded {} agents as {state:?}",
                buckets[state.index()].len()
            );
        }

        Self { agents }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn state_of(&self, idx: usize) -> State {
        self.agents[idx].state()
    }

    pub fn agent_mut(&mut self, idx: usize) -> &mut Agent {
        &mut self.agents[idx]
    }
}

/// Instantaneous per-compartment census of the population.
///
/// Updated in lock-step with every single-agent transition, so the four
/// counts always sum to the population size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningCounts {
    counts: [usize; State::COUNT],
}

impl RunningCounts {
    pub fn new(counts: [usize; State::COUNT]) -> Self {
        Self { counts }
    }

    pub fn get(&self, state: State) -> usize {
        self.counts[state.index()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn fraction(&self, state: State) -> f64 {
        self.get(state) as f64 / self.total() as f64
    }

    /// Apply one agent transition to the census. A no-op transition
    /// decrements and increments the same bucket.
    pub fn record_transition(&mut self, pre: State, post: State) {
        self.counts[pre.index()] -= 1;
        self.counts[post.index()] += 1;
    }
}

/// One reporting-cycle record of the output series: the average population
/// fraction of each compartment over the reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub cycle: usize,
    pub frac_s: f64,
    pub frac_p: f64,
    pub frac_i: f64,
    pub frac_r: f64,
}

impl Record {
    /// Seed record: the instantaneous census as raw fractions.
    pub fn from_census(cycle: usize, counts: &RunningCounts) -> Self {
        let n = counts.total() as f64;
        Self {
            cycle,
            frac_s: counts.get(State::Susceptible) as f64 / n,
            frac_p: counts.get(State::Protected) as f64 / n,
            frac_i: counts.get(State::Infected) as f64 / n,
            frac_r: counts.get(State::Recovered) as f64 / n,
        }
    }

    /// Average the counts accumulated over a window of `window` micro-steps
    /// into per-compartment fractions of a population of size `n`.
    pub fn from_window(cycle: usize, accum: [u64; State::COUNT], n: usize, window: usize) -> Self {
        let norm = (n as u64 * window as u64) as f64;
        Self {
            cycle,
            frac_s: accum[State::Susceptible.index()] as f64 / norm,
            frac_p: accum[State::Protected.index()] as f64 / norm,
            frac_i: accum[State::Infected.index()] as f64 / norm,
            frac_r: accum[State::Recovered.index()] as f64 / norm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha12Rng;

    fn rng() -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(42)
    }

    fn probs(beta_s: f64, beta_p: f64, gamma: f64) -> DiseaseProbs {
        DiseaseProbs {
            beta_s,
            beta_p,
            gamma,
        }
    }

    fn payoffs() -> Payoffs {
        Payoffs {
            susceptible: 1.0,
            protected: 0.95,
            infected: 0.1,
            recovered: 0.95,
        }
    }

    #[test]
    fn prob_from_rate_bounds() {
        assert_eq!(prob_from_rate(0.0), 0.0);
        assert!((prob_from_rate(1e9) - 1.0).abs() < 1e-12);

        let mut prev = 0.0;
        for k in 1..100 {
            let p = prob_from_rate(k as f64 * 0.1);
            assert!(p > prev);
            assert!(p < 1.0);
            prev = p;
        }
    }

    #[test]
    fn susceptible_is_infected_by_certain_contact() {
        let mut agent = Agent::new(0, State::Susceptible, probs(1.0, 1.0, 0.0), 10, payoffs());
        assert_eq!(agent.interact(State::Infected, &mut rng()), State::Infected);
    }

    #[test]
    fn no_infection_without_infected_partner() {
        let mut rng = rng();
        let mut agent = Agent::new(0, State::Susceptible, probs(1.0, 1.0, 0.0), 10, payoffs());
        for other in [State::Susceptible, State::Protected, State::Recovered] {
            assert_eq!(agent.interact(other, &mut rng), State::Susceptible);
        }
    }

    #[test]
    fn no_infection_at_zero_beta() {
        let mut rng = rng();
        let mut agent = Agent::new(0, State::Protected, probs(0.0, 0.0, 0.0), 10, payoffs());
        for _ in 0..100 {
            assert_eq!(agent.interact(State::Infected, &mut rng), State::Protected);
        }
    }

    #[test]
    fn recovered_is_terminal() {
        let mut rng = rng();
        let mut agent = Agent::new(0, State::Recovered, probs(1.0, 1.0, 1.0), 10, payoffs());
        for _ in 0..100 {
            assert_eq!(agent.interact(State::Infected, &mut rng), State::Recovered);
            assert_eq!(agent.decide(1.0, &ExpectedUtility), State::Recovered);
            assert_eq!(agent.recover(&mut rng), State::Recovered);
        }
    }

    #[test]
    fn infected_recovers_with_certainty() {
        let mut agent = Agent::new(0, State::Infected, probs(0.0, 0.0, 1.0), 10, payoffs());
        assert_eq!(agent.recover(&mut rng()), State::Recovered);
    }

    #[test]
    fn high_prevalence_drives_protection() {
        // Protection is nearly free and infection is costly, so at high
        // prevalence the expected-utility rule must adopt protection.
        let probs = probs(0.9, 0.01, 0.2);
        let mut agent = Agent::new(0, State::Susceptible, probs, 50, payoffs());
        assert_eq!(agent.decide(0.9, &ExpectedUtility), State::Protected);
    }

    #[test]
    fn zero_prevalence_drops_protection() {
        let probs = probs(0.9, 0.01, 0.2);
        let mut agent = Agent::new(0, State::Protected, probs, 50, payoffs());
        assert_eq!(agent.decide(0.0, &ExpectedUtility), State::Susceptible);
    }

    #[test]
    fn infected_agents_never_decide() {
        let mut agent = Agent::new(0, State::Infected, probs(0.9, 0.01, 0.2), 50, payoffs());
        assert_eq!(agent.decide(0.9, &ExpectedUtility), State::Infected);
    }

    #[test]
    fn population_assigns_sequential_ids_in_state_order() {
        let pop = Population::from_counts([2, 1, 1, 0], probs(0.5, 0.1, 0.2), 10, payoffs());
        assert_eq!(pop.len(), 4);
        assert_eq!(pop.state_of(0), State::Susceptible);
        assert_eq!(pop.state_of(1), State::Susceptible);
        assert_eq!(pop.state_of(2), State::Protected);
        assert_eq!(pop.state_of(3), State::Infected);
    }

    #[test]
    fn running_counts_conserve_total() {
        let mut counts = RunningCounts::new([3, 0, 1, 0]);
        assert_eq!(counts.total(), 4);

        counts.record_transition(State::Susceptible, State::Infected);
        assert_eq!(counts.get(State::Infected), 2);
        assert_eq!(counts.total(), 4);

        // No-op transitions leave the census unchanged.
        counts.record_transition(State::Infected, State::Infected);
        assert_eq!(counts.get(State::Infected), 2);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn window_record_fractions_sum_to_one() {
        // 4 agents over a window of 4 steps: accumulated counts sum to 16.
        let record = Record::from_window(1, [8, 2, 4, 2], 4, 4);
        let sum = record.frac_s + record.frac_p + record.frac_i + record.frac_r;
        assert!((sum - 1.0).abs() < 1e-12);
        assert_eq!(record.frac_s, 0.5);
    }
}
