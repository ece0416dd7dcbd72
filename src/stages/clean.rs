use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::config::Config;
use crate::executor::TaskContext;
use crate::stage::{StageOutput, TransformStage};
use crate::utils::{as_overhead, clear_dir, remove_dir};

/// Removes the previous build: everything in the distribution tree except
/// version-control metadata, and the whole temporary tree. The cache is
/// never touched.
pub struct CleanStage {
    dist: Utf8PathBuf,
    temp: Utf8PathBuf,
    keep: Vec<Utf8PathBuf>,
}

impl CleanStage {
    pub fn new(config: &Config) -> Self {
        let dist = config.dist_dir();

        Self {
            keep: vec![dist.join(".git"), config.cache_dir()],
            temp: config.temp_dir(),
            dist,
        }
    }
}

impl TransformStage for CleanStage {
    fn inputs(&self) -> Vec<Utf8PathBuf> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<Utf8PathBuf> {
        vec![self.dist.clone(), self.temp.clone()]
    }

    fn run(&self, _: &TaskContext) -> anyhow::Result<StageOutput> {
        let s = std::time::Instant::now();
        let keep: Vec<&Utf8Path> = self.keep.iter().map(Utf8PathBuf::as_path).collect();

        clear_dir(&self.dist, &keep)?;
        remove_dir(&self.temp)?;

        info!("Cleaned {} and {} {}", self.dist, self.temp, as_overhead(s));
        Ok(StageOutput::default())
    }
}

/// The sink of the graph, drops the temporary tree once everything else is
/// done.
pub struct FinishStage {
    temp: Utf8PathBuf,
    keep_temp: bool,
}

impl FinishStage {
    pub fn new(config: &Config) -> Self {
        Self {
            temp: config.temp_dir(),
            keep_temp: config.paths.keep_temp,
        }
    }
}

impl TransformStage for FinishStage {
    fn inputs(&self) -> Vec<Utf8PathBuf> {
        vec![self.temp.clone()]
    }

    fn outputs(&self) -> Vec<Utf8PathBuf> {
        vec![self.temp.clone()]
    }

    fn run(&self, _: &TaskContext) -> anyhow::Result<StageOutput> {
        if !self.keep_temp {
            remove_dir(&self.temp)?;
        }

        Ok(StageOutput::default())
    }
}
