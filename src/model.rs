//! Simulation data types.

use crate::config::ModelConfig;
use crate::motion::{MotionField, displace};
use anyhow::{Context, Result};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique agent identifier. Never reused within a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// Discriminant of [`AgentState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    Healthy,
    InfectedAsymptomatic,
    InfectedSymptomatic,
    Quarantined,
    Recovered,
    Dead,
}

/// Epidemiological state of one agent, together with its timers.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    Healthy,
    InfectedAsymptomatic {
        incubation_left: f64,
        spread_left: f64,
    },
    InfectedSymptomatic {
        illness_left: f64,
        spread_left: f64,
        /// `None` once quarantine is disabled or has already been attempted.
        quarantine_left: Option<f64>,
    },
    Quarantined {
        release_left: f64,
    },
    Recovered,
    Dead {
        removal_left: f64,
    },
}

/// Intent emitted by a tick and applied by the simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    SpreadInfection(AgentId),
    ChangeState(AgentId, StateKind),
    RemoveAgent(AgentId),
}

impl AgentState {
    /// Construct a fresh state of the given kind.
    ///
    /// `duration` is the agent's own incubation or illness time and is only
    /// used by the infected states. `prev` is the kind being replaced.
    pub fn new(kind: StateKind, prev: StateKind, duration: f64, cfg: &ModelConfig) -> Self {
        match kind {
            StateKind::Healthy => Self::Healthy,
            StateKind::InfectedAsymptomatic => Self::InfectedAsymptomatic {
                incubation_left: duration,
                spread_left: cfg.spread_interval,
            },
            StateKind::InfectedSymptomatic => Self::InfectedSymptomatic {
                illness_left: duration,
                spread_left: cfg.spread_interval,
                quarantine_left: cfg
                    .quarantine
                    .enabled
                    .then_some(cfg.quarantine.trigger_delay),
            },
            StateKind::Quarantined => Self::Quarantined {
                release_left: cfg.quarantine.release_delay,
            },
            StateKind::Recovered => Self::Recovered,
            // Agents leaving quarantine dead are removed right away.
            StateKind::Dead => Self::Dead {
                removal_left: if prev == StateKind::Quarantined {
                    0.0
                } else {
                    cfg.removal_delay
                },
            },
        }
    }

    pub fn kind(&self) -> StateKind {
        match self {
            Self::Healthy => StateKind::Healthy,
            Self::InfectedAsymptomatic { .. } => StateKind::InfectedAsymptomatic,
            Self::InfectedSymptomatic { .. } => StateKind::InfectedSymptomatic,
            Self::Quarantined { .. } => StateKind::Quarantined,
            Self::Recovered => StateKind::Recovered,
            Self::Dead { .. } => StateKind::Dead,
        }
    }

    /// Whether the state takes part in contagion scans as a source.
    pub fn is_contagious(&self) -> bool {
        matches!(
            self,
            Self::InfectedAsymptomatic { .. } | Self::InfectedSymptomatic { .. }
        )
    }

    pub fn is_mobile(&self) -> bool {
        !matches!(self, Self::Dead { .. })
    }

    /// Advance the timers by `dt` and push the resulting events.
    ///
    /// At most one [`Event::ChangeState`] is emitted per tick.
    pub fn tick<R: Rng>(
        &mut self,
        id: AgentId,
        dt: f64,
        cfg: &ModelConfig,
        rng: &mut R,
        events: &mut Vec<Event>,
    ) {
        match self {
            Self::Healthy | Self::Recovered => {}
            Self::InfectedAsymptomatic {
                incubation_left,
                spread_left,
            } => {
                tick_spread(spread_left, id, dt, cfg, events);

                *incubation_left -= dt;
                if *incubation_left <= 0.0 {
                    events.push(Event::ChangeState(id, StateKind::InfectedSymptomatic));
                }
            }
            Self::InfectedSymptomatic {
                illness_left,
                spread_left,
                quarantine_left,
            } => {
                tick_spread(spread_left, id, dt, cfg, events);

                *illness_left -= dt;
                if *illness_left <= 0.0 {
                    let kind = if rng.random::<f64>() < cfg.prob_recover {
                        StateKind::Recovered
                    } else {
                        StateKind::Dead
                    };
                    events.push(Event::ChangeState(id, kind));
                    // A resolved illness skips the quarantine check in this tick.
                    return;
                }

                if let Some(left) = quarantine_left.as_mut() {
                    *left -= dt;
                    if *left <= 0.0 {
                        *quarantine_left = None;
                        if rng.random::<f64>() < cfg.quarantine.prob_quarantine {
                            events.push(Event::ChangeState(id, StateKind::Quarantined));
                        }
                    }
                }
            }
            Self::Quarantined { release_left } => {
                *release_left -= dt;
                if *release_left <= 0.0 {
                    let kind = if rng.random::<f64>() < cfg.quarantine.prob_survive {
                        StateKind::Recovered
                    } else {
                        StateKind::Dead
                    };
                    events.push(Event::ChangeState(id, kind));
                }
            }
            Self::Dead { removal_left } => {
                *removal_left -= dt;
                if *removal_left <= 0.0 {
                    events.push(Event::RemoveAgent(id));
                }
            }
        }
    }
}

fn tick_spread(
    spread_left: &mut f64,
    id: AgentId,
    dt: f64,
    cfg: &ModelConfig,
    events: &mut Vec<Event>,
) {
    *spread_left -= dt;
    if *spread_left <= 0.0 {
        *spread_left = cfg.spread_interval;
        events.push(Event::SpreadInfection(id));
    }
}

/// Agent of the simulation.
#[derive(Clone)]
pub struct Agent {
    id: AgentId,
    pos: (f64, f64),
    speed: f64,
    radius: f64,
    spread_radius: f64,
    incubation_time: f64,
    illness_time: f64,
    motion: MotionField,
    state: AgentState,
}

impl Agent {
    /// Create a new agent at `pos` in a fresh state of the given kind.
    ///
    /// Incubation and illness times are drawn once, here.
    pub fn new<R: Rng>(
        id: AgentId,
        pos: (f64, f64),
        kind: StateKind,
        dur_dist: &DurationDist,
        cfg: &ModelConfig,
        rng: &mut R,
    ) -> Self {
        let incubation_time = dur_dist.incubation.sample(rng);
        let illness_time = dur_dist.illness.sample(rng);
        let motion = MotionField::new(rng);
        let mut agt = Self {
            id,
            pos,
            speed: cfg.agent_speed,
            radius: cfg.agent_radius,
            spread_radius: cfg.spread_radius,
            incubation_time,
            illness_time,
            motion,
            state: AgentState::Healthy,
        };
        agt.change_state(kind, cfg);
        agt
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn pos(&self) -> (f64, f64) {
        self.pos
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn spread_radius(&self) -> f64 {
        self.spread_radius
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    /// Replace the current state with a fresh one of the given kind.
    pub fn change_state(&mut self, kind: StateKind, cfg: &ModelConfig) {
        let duration = match kind {
            StateKind::InfectedAsymptomatic => self.incubation_time,
            StateKind::InfectedSymptomatic => self.illness_time,
            _ => 0.0,
        };
        self.state = AgentState::new(kind, self.state.kind(), duration, cfg);
    }

    /// Wander inside the `[0, width] x [0, height]` arena for `dt`.
    pub fn move_within(&mut self, dt: f64, width: f64, height: f64) {
        if !self.state.is_mobile() {
            return;
        }
        let (dx, dy) = self.motion.advance(self.speed, dt);
        self.pos.0 = displace(self.pos.0, dx, self.radius, width);
        self.pos.1 = displace(self.pos.1, dy, self.radius, height);
    }

    pub fn tick<R: Rng>(
        &mut self,
        dt: f64,
        cfg: &ModelConfig,
        rng: &mut R,
        events: &mut Vec<Event>,
    ) {
        self.state.tick(self.id, dt, cfg, rng, events);
    }

    pub fn distance_to(&self, pos: (f64, f64)) -> f64 {
        (self.pos.0 - pos.0).hypot(self.pos.1 - pos.1)
    }

    #[cfg(test)]
    pub(crate) fn set_state(&mut self, state: AgentState) {
        self.state = state;
    }
}

/// Uniform distributions of the per-agent incubation and illness times.
#[derive(Debug, Clone)]
pub struct DurationDist {
    incubation: Uniform<f64>,
    illness: Uniform<f64>,
}

impl DurationDist {
    pub fn new(cfg: &ModelConfig) -> Result<Self> {
        let [min, max] = cfg.incubation_time;
        let incubation =
            Uniform::new_inclusive(min, max).context("invalid incubation time range")?;
        let [min, max] = cfg.illness_time;
        let illness = Uniform::new_inclusive(min, max).context("invalid illness time range")?;
        Ok(Self {
            incubation,
            illness,
        })
    }
}

/// Number of agents in each state kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub healthy: usize,
    pub infected_asymptomatic: usize,
    pub infected_symptomatic: usize,
    pub quarantined: usize,
    pub recovered: usize,
    pub dead: usize,
}

impl Statistics {
    pub fn add(&mut self, kind: StateKind) {
        match kind {
            StateKind::Healthy => self.healthy += 1,
            StateKind::InfectedAsymptomatic => self.infected_asymptomatic += 1,
            StateKind::InfectedSymptomatic => self.infected_symptomatic += 1,
            StateKind::Quarantined => self.quarantined += 1,
            StateKind::Recovered => self.recovered += 1,
            StateKind::Dead => self.dead += 1,
        }
    }

    pub fn get(&self, kind: StateKind) -> usize {
        match kind {
            StateKind::Healthy => self.healthy,
            StateKind::InfectedAsymptomatic => self.infected_asymptomatic,
            StateKind::InfectedSymptomatic => self.infected_symptomatic,
            StateKind::Quarantined => self.quarantined,
            StateKind::Recovered => self.recovered,
            StateKind::Dead => self.dead,
        }
    }

    /// Number of agents still in the population.
    pub fn total(&self) -> usize {
        self.healthy
            + self.infected_asymptomatic
            + self.infected_symptomatic
            + self.quarantined
            + self.recovered
            + self.dead
    }

    /// Number of agents currently infected, quarantined or not.
    pub fn active(&self) -> usize {
        self.infected_asymptomatic + self.infected_symptomatic + self.quarantined
    }
}

impl<'a> FromIterator<&'a Agent> for Statistics {
    fn from_iter<I: IntoIterator<Item = &'a Agent>>(iter: I) -> Self {
        let mut stats = Self::default();
        for agt in iter {
            stats.add(agt.kind());
        }
        stats
    }
}

/// Record of the simulation at a single save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Current simulation step.
    pub step: usize,
    /// Current simulation time.
    pub time: f64,
    /// Counts per state kind.
    pub stats: Statistics,
    /// Infections since the previous record.
    pub n_infections: usize,
    /// Removals since the previous record.
    pub n_removals: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    const ID: AgentId = AgentId(0);

    fn tick(
        state: &mut AgentState,
        dt: f64,
        cfg: &ModelConfig,
        rng: &mut ChaCha12Rng,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        state.tick(ID, dt, cfg, rng, &mut events);
        events
    }

    fn quarantined(cfg: &ModelConfig) -> AgentState {
        AgentState::new(StateKind::Quarantined, StateKind::InfectedSymptomatic, 0.0, cfg)
    }

    fn symptomatic(illness_left: f64, cfg: &ModelConfig) -> AgentState {
        AgentState::new(
            StateKind::InfectedSymptomatic,
            StateKind::InfectedAsymptomatic,
            illness_left,
            cfg,
        )
    }

    #[test]
    fn stable_states_emit_nothing() {
        let cfg = test_config().model;
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        for mut state in [AgentState::Healthy, AgentState::Recovered] {
            for _ in 0..100 {
                assert!(tick(&mut state, 10.0, &cfg, &mut rng).is_empty());
            }
        }
    }

    #[test]
    fn asymptomatic_spreads_and_progresses() {
        let cfg = test_config().model;
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let mut state = AgentState::new(
            StateKind::InfectedAsymptomatic,
            StateKind::Healthy,
            2.5,
            &cfg,
        );

        assert!(tick(&mut state, 0.5, &cfg, &mut rng).is_empty());
        assert_eq!(
            tick(&mut state, 0.5, &cfg, &mut rng),
            vec![Event::SpreadInfection(ID)]
        );
        assert_eq!(
            state,
            AgentState::InfectedAsymptomatic {
                incubation_left: 1.5,
                spread_left: 1.0
            }
        );

        assert_eq!(
            tick(&mut state, 1.5, &cfg, &mut rng),
            vec![
                Event::SpreadInfection(ID),
                Event::ChangeState(ID, StateKind::InfectedSymptomatic)
            ]
        );
    }

    #[test]
    fn timers_are_non_increasing() {
        let cfg = test_config().model;
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let mut state = symptomatic(100.0, &cfg);
        let mut last = f64::INFINITY;
        for _ in 0..50 {
            tick(&mut state, 0.3, &cfg, &mut rng);
            let AgentState::InfectedSymptomatic { illness_left, .. } = state else {
                panic!("unexpected state {state:?}");
            };
            assert!(illness_left <= last);
            last = illness_left;
        }
    }

    #[test]
    fn symptomatic_recovers_when_certain() {
        let mut cfg = test_config().model;
        cfg.prob_recover = 1.0;
        cfg.quarantine.enabled = false;
        for seed in 0..200 {
            let mut rng = ChaCha12Rng::seed_from_u64(seed);
            let mut state = symptomatic(1.0, &cfg);
            let events = tick(&mut state, 1.0, &cfg, &mut rng);
            assert!(events.contains(&Event::ChangeState(ID, StateKind::Recovered)));
            assert!(!events.contains(&Event::ChangeState(ID, StateKind::Dead)));
        }
    }

    #[test]
    fn symptomatic_dies_when_recovery_impossible() {
        let mut cfg = test_config().model;
        cfg.prob_recover = 0.0;
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut state = symptomatic(1.0, &cfg);
        let events = tick(&mut state, 2.0, &cfg, &mut rng);
        assert_eq!(events.last(), Some(&Event::ChangeState(ID, StateKind::Dead)));
    }

    #[test]
    fn illness_end_preempts_quarantine() {
        let mut cfg = test_config().model;
        cfg.prob_recover = 1.0;
        cfg.quarantine.prob_quarantine = 1.0;
        cfg.quarantine.trigger_delay = 1.0;
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut state = symptomatic(1.0, &cfg);
        let events = tick(&mut state, 1.0, &cfg, &mut rng);
        let n_changes = events
            .iter()
            .filter(|event| matches!(event, Event::ChangeState(..)))
            .count();
        assert_eq!(n_changes, 1);
        assert!(events.contains(&Event::ChangeState(ID, StateKind::Recovered)));
    }

    #[test]
    fn quarantine_is_attempted_once() {
        let mut cfg = test_config().model;
        cfg.quarantine.prob_quarantine = 0.0;
        cfg.quarantine.trigger_delay = 1.0;
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let mut state = symptomatic(1000.0, &cfg);

        // Certain success after the failed draw must not trigger a second attempt.
        tick(&mut state, 1.5, &cfg, &mut rng);
        cfg.quarantine.prob_quarantine = 1.0;
        for _ in 0..100 {
            let events = tick(&mut state, 1.0, &cfg, &mut rng);
            assert!(!events.contains(&Event::ChangeState(ID, StateKind::Quarantined)));
        }
        let AgentState::InfectedSymptomatic { quarantine_left, .. } = state else {
            panic!("unexpected state {state:?}");
        };
        assert_eq!(quarantine_left, None);
    }

    #[test]
    fn quarantine_triggers_when_certain() {
        let mut cfg = test_config().model;
        cfg.quarantine.prob_quarantine = 1.0;
        cfg.quarantine.trigger_delay = 1.0;
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut state = symptomatic(1000.0, &cfg);
        assert!(tick(&mut state, 0.5, &cfg, &mut rng).is_empty());
        let events = tick(&mut state, 0.5, &cfg, &mut rng);
        assert!(events.contains(&Event::ChangeState(ID, StateKind::Quarantined)));
    }

    #[test]
    fn disabled_quarantine_never_triggers() {
        let mut cfg = test_config().model;
        cfg.quarantine.enabled = false;
        cfg.quarantine.prob_quarantine = 1.0;
        let state = symptomatic(10.0, &cfg);
        assert!(matches!(
            state,
            AgentState::InfectedSymptomatic {
                quarantine_left: None,
                ..
            }
        ));
    }

    #[test]
    fn quarantined_dies_when_survival_impossible() {
        let mut cfg = test_config().model;
        cfg.quarantine.prob_survive = 0.0;
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        let mut state = quarantined(&cfg);
        assert!(!state.is_contagious());
        assert!(tick(&mut state, 4.0, &cfg, &mut rng).is_empty());
        assert_eq!(
            tick(&mut state, 1.0, &cfg, &mut rng),
            vec![Event::ChangeState(ID, StateKind::Dead)]
        );
    }

    #[test]
    fn quarantined_recovers_when_survival_certain() {
        let mut cfg = test_config().model;
        cfg.quarantine.prob_survive = 1.0;
        for seed in 0..50 {
            let mut rng = ChaCha12Rng::seed_from_u64(seed);
            let mut state = quarantined(&cfg);
            assert!(tick(&mut state, 4.0, &cfg, &mut rng).is_empty());
            assert_eq!(
                tick(&mut state, 1.0, &cfg, &mut rng),
                vec![Event::ChangeState(ID, StateKind::Recovered)]
            );
        }
    }

    #[test]
    fn dead_removal_delay_depends_on_previous_state() {
        let cfg = test_config().model;
        assert_eq!(
            AgentState::new(StateKind::Dead, StateKind::InfectedSymptomatic, 0.0, &cfg),
            AgentState::Dead {
                removal_left: cfg.removal_delay
            }
        );
        assert_eq!(
            AgentState::new(StateKind::Dead, StateKind::Quarantined, 0.0, &cfg),
            AgentState::Dead { removal_left: 0.0 }
        );
    }

    #[test]
    fn dead_is_removed_after_delay() {
        let cfg = test_config().model;
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let mut state = AgentState::new(StateKind::Dead, StateKind::InfectedSymptomatic, 0.0, &cfg);
        assert!(!state.is_contagious());
        assert!(!state.is_mobile());
        assert!(tick(&mut state, 2.0, &cfg, &mut rng).is_empty());
        assert_eq!(
            tick(&mut state, 1.0, &cfg, &mut rng),
            vec![Event::RemoveAgent(ID)]
        );
    }

    #[test]
    fn agent_draws_durations_in_range() {
        let cfg = test_config().model;
        let dur_dist = DurationDist::new(&cfg).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(6);
        for i in 0..100 {
            let agt = Agent::new(
                AgentId(i),
                (5.0, 5.0),
                StateKind::InfectedAsymptomatic,
                &dur_dist,
                &cfg,
                &mut rng,
            );
            let AgentState::InfectedAsymptomatic { incubation_left, .. } = *agt.state() else {
                panic!("unexpected state {:?}", agt.state());
            };
            assert!((cfg.incubation_time[0]..=cfg.incubation_time[1]).contains(&incubation_left));
            assert!((cfg.illness_time[0]..=cfg.illness_time[1]).contains(&agt.illness_time));
        }
    }

    #[test]
    fn dead_agent_does_not_move() {
        let cfg = test_config().model;
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        let dur_dist = DurationDist::new(&cfg).unwrap();
        let mut agt = Agent::new(
            AgentId(0),
            (20.0, 20.0),
            StateKind::Dead,
            &dur_dist,
            &cfg,
            &mut rng,
        );
        for _ in 0..10 {
            agt.move_within(1.0, 40.0, 40.0);
        }
        assert_eq!(agt.pos(), (20.0, 20.0));
    }

    #[test]
    fn statistics_count_kinds() {
        let cfg = test_config().model;
        let dur_dist = DurationDist::new(&cfg).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let kinds = [
            StateKind::Healthy,
            StateKind::Healthy,
            StateKind::InfectedAsymptomatic,
            StateKind::Quarantined,
            StateKind::Dead,
        ];
        let agents: Vec<_> = kinds
            .iter()
            .enumerate()
            .map(|(i, &kind)| {
                Agent::new(AgentId(i as u64), (5.0, 5.0), kind, &dur_dist, &cfg, &mut rng)
            })
            .collect();
        let stats: Statistics = agents.iter().collect();
        assert_eq!(stats.get(StateKind::Healthy), 2);
        assert_eq!(stats.active(), 2);
        assert_eq!(stats.dead, 1);
        assert_eq!(stats.total(), kinds.len());
    }
}
