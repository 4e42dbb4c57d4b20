use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Disease and movement parameters.
    pub model: ModelConfig,
    /// Initial population parameters.
    pub init: InitConfig,
    /// Output parameters.
    pub output: OutputConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Radius of every agent.
    pub agent_radius: f64,
    /// Movement speed of every agent (distance per unit time).
    pub agent_speed: f64,

    /// Maximum distance at which a contagious agent infects a healthy one.
    pub spread_radius: f64,
    /// Time between two contagion scans of the same contagious agent.
    pub spread_interval: f64,

    /// Range `[min, max]` from which each agent draws its incubation time.
    pub incubation_time: [f64; 2],
    /// Range `[min, max]` from which each agent draws its illness time.
    pub illness_time: [f64; 2],
    /// Probability that a symptomatic agent recovers once its illness ends.
    pub prob_recover: f64,

    /// Time a dead agent lingers before being removed.
    pub removal_delay: f64,

    pub quarantine: QuarantineConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct QuarantineConfig {
    pub enabled: bool,
    /// Time after the onset of symptoms at which quarantine is attempted.
    pub trigger_delay: f64,
    /// Probability that the quarantine attempt succeeds.
    pub prob_quarantine: f64,
    /// Time spent in quarantine.
    pub release_delay: f64,
    /// Probability of recovering (instead of dying) at release.
    pub prob_survive: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Number of agents.
    pub n_agents: usize,
    /// Fraction of agents that start infected without symptoms.
    pub frac_infected: f64,

    /// Width of the arena.
    pub width: f64,
    /// Height of the arena.
    pub height: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Elapsed time passed to every simulation step.
    pub time_step: f64,
    /// Number of steps between saved records.
    pub steps_per_save: usize,
    /// Maximum number of saved records per run.
    pub n_saves: usize,
    /// Stop the run as soon as no agent is infected or quarantined.
    #[serde(default)]
    pub stop_when_settled: bool,
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

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate().context("invalid model section")?;
        self.init.validate().context("invalid init section")?;
        self.output.validate().context("invalid output section")?;

        let diameter = 2.0 * self.model.agent_radius;
        if self.init.width <= diameter || self.init.height <= diameter {
            bail!("arena must be larger than one agent diameter ({diameter})");
        }

        Ok(())
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.agent_radius, 0.0..f64::INFINITY).context("invalid agent radius")?;
        check_num(self.agent_speed, 0.0..f64::INFINITY).context("invalid agent speed")?;

        check_num(self.spread_radius, 0.0..f64::INFINITY).context("invalid spread radius")?;
        check_num(self.spread_interval, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid spread interval")?;

        check_range(self.incubation_time).context("invalid incubation time")?;
        check_range(self.illness_time).context("invalid illness time")?;
        check_num(self.prob_recover, 0.0..=1.0).context("invalid recovery probability")?;

        check_num(self.removal_delay, 0.0..f64::INFINITY).context("invalid removal delay")?;

        self.quarantine
            .validate()
            .context("invalid quarantine section")?;

        Ok(())
    }
}

impl QuarantineConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.trigger_delay, 0.0..f64::INFINITY).context("invalid trigger delay")?;
        check_num(self.prob_quarantine, 0.0..=1.0).context("invalid quarantine probability")?;
        check_num(self.release_delay, 0.0..f64::INFINITY).context("invalid release delay")?;
        check_num(self.prob_survive, 0.0..=1.0).context("invalid survival probability")?;
        Ok(())
    }
}

impl InitConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.n_agents, 1..100_000).context("invalid number of agents")?;
        check_num(self.frac_infected, 0.0..=1.0).context("invalid infected fraction")?;
        check_num(self.width, 0.0..f64::INFINITY).context("invalid width")?;
        check_num(self.height, 0.0..f64::INFINITY).context("invalid height")?;
        Ok(())
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.time_step, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid time step")?;
        check_num(self.steps_per_save, 1..1_000_000).context("invalid number of steps per save")?;
        check_num(self.n_saves, 1..1_000_000).context("invalid number of saves")?;
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

fn check_range(range: [f64; 2]) -> Result<()> {
    let [min, max] = range;
    check_num(min, 0.0..f64::INFINITY).context("invalid lower end")?;
    check_num(max, min..f64::INFINITY).context("invalid upper end")?;
    Ok(())
}
