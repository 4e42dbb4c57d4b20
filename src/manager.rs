use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::{Observer, Simulation};
use crate::model::{AgentId, Record, StateKind};
use anyhow::{Context, Result};
use glob::glob;
use rmp_serde::encode;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Counts observer notifications between two saved records.
#[derive(Default)]
struct Incidence {
    n_infections: usize,
    n_removals: usize,
}

impl Observer for Incidence {
    fn on_agent_changed(&mut self, _id: AgentId, kind: StateKind, removed: bool) {
        if removed {
            self.n_removals += 1;
        } else if kind == StateKind::InfectedAsymptomatic {
            self.n_infections += 1;
        }
    }
}

impl Incidence {
    fn record(&mut self, sim: &Simulation) -> Record {
        let inc = std::mem::take(self);
        Record {
            step: sim.n_steps(),
            time: sim.time(),
            stats: sim.statistics(),
            n_infections: inc.n_infections,
            n_removals: inc.n_removals,
        }
    }
}

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

    /// Create a new run directory and perform one simulation in it.
    pub fn create_run(&self, seed: Option<u64>) -> Result<()> {
        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;

        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let sim = match seed {
            Some(seed) => Simulation::from_seed(self.cfg.clone(), seed),
            None => Simulation::from_os_rng(self.cfg.clone()),
        }
        .context("failed to construct simulation")?;

        perform_simulation(sim, self.trajectory_file(run_idx))
            .context("failed to perform simulation")?;

        Ok(())
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;

        let mut analyzer = Analyzer::new(&self.cfg);
        for run_idx in 0..n_runs {
            let file = self.trajectory_file(run_idx);
            analyzer
                .add_file(&file)
                .with_context(|| format!("failed to add {file:?}"))?;
        }

        let results_file = self.results_file();
        analyzer
            .save_results(&results_file)
            .context("failed to save results")?;
        log::info!("analyzed {n_runs} runs into {results_file:?}");

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

    fn trajectory_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("trajectory.msgpack")
    }

    fn results_file(&self) -> PathBuf {
        self.sim_dir.join("results.json")
    }
}

/// Step the simulation with the configured time step, saving a record every
/// `steps_per_save` steps, and write the trajectory to a binary file.
fn perform_simulation<P: AsRef<Path>>(mut sim: Simulation, file: P) -> Result<()> {
    let file = file.as_ref();
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);

    let out = sim.cfg().output.clone();
    let mut inc = Incidence::default();
    let mut traj = Vec::with_capacity(out.n_saves + 1);
    traj.push(inc.record(&sim));

    for i_save in 0..out.n_saves {
        for _ in 0..out.steps_per_save {
            sim.step(out.time_step, &mut inc);
        }
        traj.push(inc.record(&sim));

        if (i_save + 1) % (out.n_saves / 10).max(1) == 0 {
            let progress = 100.0 * (i_save + 1) as f64 / out.n_saves as f64;
            log::info!("completed {progress:06.2}%");
        }

        if out.stop_when_settled && sim.is_settled() {
            log::info!("settled at time {:.3}", sim.time());
            break;
        }
    }

    encode::write(&mut writer, &traj).context("failed to serialize trajectory")?;
    writer.flush().context("failed to flush writer stream")?;

    let stats = sim.statistics();
    log::info!("final statistics: {stats:?}");

    Ok(())
}
