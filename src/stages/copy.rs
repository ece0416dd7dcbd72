use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::config::Config;
use crate::executor::TaskContext;
use crate::stage::{StageOutput, TransformStage, expand_ordered, matches_any};
use crate::utils::as_overhead;

/// Copies the top-level static files of the source tree (favicons, manifest,
/// `robots.txt`, dot-files) to the distribution tree unchanged.
///
/// HTML files and the service-worker entry are left to the stages which own
/// them.
pub struct CopyStage {
    source: Utf8PathBuf,
    dist: Utf8PathBuf,
    files: Vec<Utf8PathBuf>,
}

impl CopyStage {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let source = config.source_dir();
        let excluded = [config.service_worker.entry.to_string()];

        let files = expand_ordered(&source, &["*".to_string()])?
            .into_iter()
            .filter(|path| !matches_any(&config.html.sources, path))
            .filter(|path| !matches_any(&excluded, path))
            .collect();

        Ok(Self {
            source,
            dist: config.dist_dir(),
            files,
        })
    }

    pub fn files(&self) -> &[Utf8PathBuf] {
        &self.files
    }
}

impl TransformStage for CopyStage {
    fn inputs(&self) -> Vec<Utf8PathBuf> {
        self.files.iter().map(|path| self.source.join(path)).collect()
    }

    fn outputs(&self) -> Vec<Utf8PathBuf> {
        self.files.iter().map(|path| self.dist.join(path)).collect()
    }

    fn run(&self, _: &TaskContext) -> anyhow::Result<StageOutput> {
        let s = std::time::Instant::now();
        let mut output = StageOutput::default();

        fs::create_dir_all(&self.dist)?;

        for path in &self.files {
            let target = self.dist.join(path);
            copy(&self.source.join(path), &target)?;
            output = output.written(target);
        }

        info!("Copied {} files {}", self.files.len(), as_overhead(s));
        Ok(output)
    }
}

fn copy(from: &Utf8Path, to: &Utf8Path) -> anyhow::Result<()> {
    fs::copy(from, to).map_err(|e| anyhow::anyhow!("Couldn't copy {from} to {to}: {e}"))?;
    Ok(())
}
