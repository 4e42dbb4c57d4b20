use crate::config::Config;
use crate::model::Record;
use crate::stats::Accumulator;
use anyhow::{Context, Result, bail};
use rmp_serde::decode;
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

/// Observable computed once per run and aggregated across runs.
pub trait Obs {
    fn update(&mut self, traj: &[Record]) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

/// Largest number of active cases and the time it is reached.
pub struct PeakActive {
    peak_acc: Accumulator,
    time_acc: Accumulator,
}

impl PeakActive {
    pub fn new() -> Self {
        Self {
            peak_acc: Accumulator::new(),
            time_acc: Accumulator::new(),
        }
    }
}

impl Obs for PeakActive {
    fn update(&mut self, traj: &[Record]) -> Result<()> {
        // The first record wins ties.
        let peak = traj
            .iter()
            .reduce(|best, rec| {
                if rec.stats.active() > best.stats.active() {
                    rec
                } else {
                    best
                }
            })
            .context("trajectory is empty")?;
        self.peak_acc.add(peak.stats.active() as f64);
        self.time_acc.add(peak.time);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "peak_active": self.peak_acc.report(),
            "peak_time": self.time_acc.report(),
        })
    }
}

/// Fraction of the population ever infected and number of deaths.
pub struct FinalSize {
    n_agents: usize,
    attack_acc: Accumulator,
    deaths_acc: Accumulator,
}

impl FinalSize {
    pub fn new(cfg: &Config) -> Self {
        Self {
            n_agents: cfg.init.n_agents,
            attack_acc: Accumulator::new(),
            deaths_acc: Accumulator::new(),
        }
    }
}

impl Obs for FinalSize {
    fn update(&mut self, traj: &[Record]) -> Result<()> {
        let first = traj.first().context("trajectory is empty")?;
        let last = traj.last().context("trajectory is empty")?;

        let n_alive = last.stats.total();
        if n_alive > self.n_agents {
            bail!("population grew from {} to {n_alive}", self.n_agents);
        }

        // Removed agents are always dead.
        let n_removed: usize = traj.iter().map(|rec| rec.n_removals).sum();
        let n_deaths = last.stats.dead + n_removed;

        let n_initial = first.stats.active();
        let n_infections: usize = traj.iter().map(|rec| rec.n_infections).sum();
        let attack_rate = (n_initial + n_infections) as f64 / self.n_agents as f64;

        self.attack_acc.add(attack_rate);
        self.deaths_acc.add(n_deaths as f64);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "attack_rate": self.attack_acc.report(),
            "n_deaths": self.deaths_acc.report(),
        })
    }
}

/// Time of the last record of each run.
pub struct Duration {
    acc: Accumulator,
}

impl Duration {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for Duration {
    fn update(&mut self, traj: &[Record]) -> Result<()> {
        let last = traj.last().context("trajectory is empty")?;
        self.acc.add(last.time);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "duration": self.acc.report() })
    }
}

pub struct Analyzer {
    n_runs: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: &Config) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(PeakActive::new()),
            Box::new(FinalSize::new(cfg)),
            Box::new(Duration::new()),
        ];
        Self {
            n_runs: 0,
            obs_ptr_vec,
        }
    }

    pub fn add_trajectory(&mut self, traj: &[Record]) -> Result<()> {
        for obs in &mut self.obs_ptr_vec {
            obs.update(traj).context("failed to update observable")?;
        }
        self.n_runs += 1;
        Ok(())
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        let traj: Vec<Record> =
            decode::from_read(&mut reader).context("failed to deserialize trajectory")?;
        self.add_trajectory(&traj)
    }

    pub fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self.obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        serde_json::json!({ "n_runs": self.n_runs, "observables": reports })
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, &self.report())
            .context("failed to serialize results")?;
        Ok(())
    }
}
