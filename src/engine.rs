use crate::config::Config;
use crate::model::{Agent, AgentId, DurationDist, Event, Statistics, StateKind};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Uniform;
use std::collections::BTreeMap;

/// Receiver of agent changes, typically a renderer.
///
/// Called synchronously from [`Simulation::step`] whenever an agent changes
/// state or is removed. The population is not fixed after construction.
pub trait Observer {
    fn on_agent_changed(&mut self, id: AgentId, kind: StateKind, removed: bool);
}

impl Observer for () {
    fn on_agent_changed(&mut self, _id: AgentId, _kind: StateKind, _removed: bool) {}
}

/// Simulation engine.
///
/// Owns the population, the arena bounds, the configuration and the random
/// number generator. Events emitted by an agent's tick are applied before
/// the next agent is processed.
pub struct Simulation {
    cfg: Config,
    agents: BTreeMap<AgentId, Agent>,
    dur_dist: DurationDist,
    rng: ChaCha12Rng,

    time: f64,
    n_steps: usize,
    n_removed: usize,

    ids: Vec<AgentId>,
    events: Vec<Event>,
}

impl Simulation {
    /// Create a new `Simulation` with the given configuration and a random initial population.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(cfg: Config, mut rng: ChaCha12Rng) -> Result<Self> {
        cfg.validate().context("failed to validate config")?;

        let n_agt = cfg.init.n_agents;
        let n_infected = (cfg.init.frac_infected * n_agt as f64).floor() as usize;

        let radius = cfg.model.agent_radius;
        let x_dist = Uniform::new_inclusive(radius, cfg.init.width - radius)?;
        let y_dist = Uniform::new_inclusive(radius, cfg.init.height - radius)?;
        let dur_dist = DurationDist::new(&cfg.model)?;

        let mut agents = BTreeMap::new();
        for i_agt in 0..n_agt {
            let id = AgentId(i_agt as u64);
            let pos = (x_dist.sample(&mut rng), y_dist.sample(&mut rng));
            let kind = if i_agt < n_infected {
                StateKind::InfectedAsymptomatic
            } else {
                StateKind::Healthy
            };
            let agt = Agent::new(id, pos, kind, &dur_dist, &cfg.model, &mut rng);
            agents.insert(id, agt);
        }
        log::debug!("seeded {n_agt} agents ({n_infected} infected)");

        Ok(Self {
            cfg,
            agents,
            dur_dist,
            rng,
            time: 0.0,
            n_steps: 0,
            n_removed: 0,
            ids: Vec::with_capacity(n_agt),
            events: Vec::new(),
        })
    }

    /// Create a reproducible simulation from a seed.
    pub fn from_seed(cfg: Config, seed: u64) -> Result<Self> {
        Self::new(cfg, ChaCha12Rng::seed_from_u64(seed))
    }

    /// Create a simulation seeded from the operating system.
    pub fn from_os_rng(cfg: Config) -> Result<Self> {
        let rng = ChaCha12Rng::try_from_os_rng()?;
        Self::new(cfg, rng)
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    /// Number of agents removed from the population so far.
    pub fn n_removed(&self) -> usize {
        self.n_removed
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Count agents per state kind in the current population.
    pub fn statistics(&self) -> Statistics {
        self.agents.values().collect()
    }

    /// Whether no agent is infected or quarantined anymore.
    pub fn is_settled(&self) -> bool {
        self.agents.values().all(|agt| {
            !matches!(
                agt.kind(),
                StateKind::InfectedAsymptomatic
                    | StateKind::InfectedSymptomatic
                    | StateKind::Quarantined
            )
        })
    }

    /// Advance the simulation by `dt`.
    ///
    /// Agents are processed in id order: each one moves, then ticks, and the
    /// events of its tick are handled before the next agent.
    pub fn step(&mut self, dt: f64, obs: &mut dyn Observer) {
        if !dt.is_finite() || dt < 0.0 {
            log::warn!("ignoring step with elapsed time {dt}");
            return;
        }

        let mut ids = std::mem::take(&mut self.ids);
        let mut events = std::mem::take(&mut self.events);
        ids.clear();
        ids.extend(self.agents.keys().copied());

        let (width, height) = (self.cfg.init.width, self.cfg.init.height);
        for &id in &ids {
            // Removed earlier in this step.
            let Some(agt) = self.agents.get_mut(&id) else {
                continue;
            };
            agt.move_within(dt, width, height);
            agt.tick(dt, &self.cfg.model, &mut self.rng, &mut events);

            for event in events.drain(..) {
                self.handle_event(event, obs);
            }
        }

        self.ids = ids;
        self.events = events;

        self.time += dt;
        self.n_steps += 1;
    }

    fn handle_event(&mut self, event: Event, obs: &mut dyn Observer) {
        match event {
            Event::SpreadInfection(id) => self.spread_infection(id, obs),
            Event::ChangeState(id, kind) => self.change_state(id, kind, obs),
            Event::RemoveAgent(id) => self.remove_agent(id, obs),
        }
    }

    fn spread_infection(&mut self, src_id: AgentId, obs: &mut dyn Observer) {
        let Some(src) = self.agents.get(&src_id) else {
            return;
        };
        if !src.state().is_contagious() {
            return;
        }
        let (pos, radius) = (src.pos(), src.spread_radius());

        for (&id, agt) in self.agents.iter_mut() {
            if id == src_id || agt.kind() != StateKind::Healthy {
                continue;
            }
            if agt.distance_to(pos) < radius {
                agt.change_state(StateKind::InfectedAsymptomatic, &self.cfg.model);
                log::trace!("{src_id} infected {id}");
                obs.on_agent_changed(id, StateKind::InfectedAsymptomatic, false);
            }
        }
    }

    fn change_state(&mut self, id: AgentId, kind: StateKind, obs: &mut dyn Observer) {
        let Some(agt) = self.agents.get_mut(&id) else {
            return;
        };
        log::trace!("{id} changed from {:?} to {kind:?}", agt.kind());
        agt.change_state(kind, &self.cfg.model);
        obs.on_agent_changed(id, kind, false);
    }

    fn remove_agent(&mut self, id: AgentId, obs: &mut dyn Observer) {
        let Some(agt) = self.agents.get(&id) else {
            return;
        };
        obs.on_agent_changed(id, agt.kind(), true);
        self.agents.remove(&id);
        self.n_removed += 1;
        log::trace!("{id} removed");
    }
}

#[cfg(test)]
impl Simulation {
    /// Insert an agent with an explicit state, bypassing the random seeding.
    pub(crate) fn place_agent(
        &mut self,
        pos: (f64, f64),
        state: crate::model::AgentState,
    ) -> AgentId {
        let id = AgentId(self.agents.keys().next_back().map_or(0, |id| id.0 + 1));
        let mut agt = Agent::new(
            id,
            pos,
            state.kind(),
            &self.dur_dist,
            &self.cfg.model,
            &mut self.rng,
        );
        agt.set_state(state);
        self.agents.insert(id, agt);
        id
    }

    pub(crate) fn clear_agents(&mut self) {
        self.agents.clear();
    }
}
