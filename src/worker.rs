//! Worker script assembly.
//!
//! The worker is built from two fragment sets: library fragments, which are
//! concatenated into one unit, and application fragments, which are staged
//! unchanged next to it. The worker entry then imports the library unit by a
//! relative path and the bundler sees both as ordinary modules.
//!
//! Library order is the caller's order. Fragments of a third-party library
//! usually rely on globals declared by earlier ones, so the order is never
//! re-derived from names or directory listings.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::core::Artifact;
use crate::executor::TaskContext;
use crate::stage::{StageOutput, TransformStage, expand_ordered, glob_base};
use crate::utils::{as_overhead, write_file};

#[derive(Debug, Clone)]
pub struct WorkerAssetAssembler {
    /// Tree the fragments are read from.
    source: Utf8PathBuf,
    /// Tree the library unit and staged fragments are written to.
    staging: Utf8PathBuf,
}

impl WorkerAssetAssembler {
    pub fn new(source: impl Into<Utf8PathBuf>, staging: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
            staging: staging.into(),
        }
    }

    /// Concatenates `fragments` (source-relative) in the given order into
    /// `output` (staging-relative).
    pub fn concat_library(
        &self,
        fragments: &[Utf8PathBuf],
        output: &Utf8Path,
    ) -> anyhow::Result<Artifact> {
        let mut parts = Vec::with_capacity(fragments.len());

        for fragment in fragments {
            let path = self.source.join(fragment);
            let text = fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("Couldn't read library fragment {path}: {e}"))?;
            debug!(%fragment, bytes = text.len(), "library fragment");
            parts.push(text);
        }

        let unit = Artifact::new(output, parts.join("\n"));
        unit.write_to(&self.staging)?;
        Ok(unit)
    }

    /// Copies `fragments` unchanged from the source tree to the same relative
    /// paths in the staging tree.
    pub fn stage_application(&self, fragments: &[Utf8PathBuf]) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let mut staged = Vec::with_capacity(fragments.len());

        for fragment in fragments {
            let target = self.staging.join(fragment);
            let bytes = fs::read(self.source.join(fragment))?;
            write_file(&target, bytes)?;
            staged.push(target);
        }

        Ok(staged)
    }

    /// Runs both steps and returns the staged location of `entry`, which has
    /// to be one of the application fragments.
    pub fn assemble(
        &self,
        library: &[Utf8PathBuf],
        library_output: &Utf8Path,
        application: &[Utf8PathBuf],
        entry: &Utf8Path,
    ) -> anyhow::Result<Utf8PathBuf> {
        if !application.iter().any(|fragment| fragment == entry) {
            anyhow::bail!("Worker entry '{entry}' is not among the application fragments");
        }

        self.concat_library(library, library_output)?;
        self.stage_application(application)?;

        Ok(self.staging.join(entry))
    }
}

/// First link of the worker chain, writes the library unit.
pub struct LibraryStage {
    assembler: WorkerAssetAssembler,
    patterns: Vec<String>,
    output: Utf8PathBuf,
}

impl LibraryStage {
    pub fn new(config: &Config) -> Self {
        Self {
            assembler: WorkerAssetAssembler::new(config.source_dir(), config.temp_dir()),
            patterns: config.worker.library.clone(),
            output: config.worker.library_output.clone(),
        }
    }
}

impl TransformStage for LibraryStage {
    fn inputs(&self) -> Vec<Utf8PathBuf> {
        self.patterns
            .iter()
            .map(|pattern| self.assembler.source.join(glob_base(pattern)))
            .collect()
    }

    fn outputs(&self) -> Vec<Utf8PathBuf> {
        vec![self.assembler.staging.join(&self.output)]
    }

    fn run(&self, _: &TaskContext) -> anyhow::Result<StageOutput> {
        let s = std::time::Instant::now();
        let fragments = expand_ordered(&self.assembler.source, &self.patterns)?;

        let unit = self.assembler.concat_library(&fragments, &self.output)?;

        info!("Concatenated {} library fragments {}", fragments.len(), as_overhead(s));
        Ok(StageOutput::default().written(self.assembler.staging.join(unit.path)))
    }
}

/// Second link of the worker chain, stages the application fragments next to
/// the library unit.
pub struct StagingStage {
    assembler: WorkerAssetAssembler,
    patterns: Vec<String>,
    library_output: Utf8PathBuf,
}

impl StagingStage {
    pub fn new(config: &Config) -> Self {
        Self {
            assembler: WorkerAssetAssembler::new(config.source_dir(), config.temp_dir()),
            patterns: config.worker.application.clone(),
            library_output: config.worker.library_output.clone(),
        }
    }
}

impl TransformStage for StagingStage {
    fn inputs(&self) -> Vec<Utf8PathBuf> {
        self.patterns
            .iter()
            .map(|pattern| self.assembler.source.join(glob_base(pattern)))
            .collect()
    }

    fn outputs(&self) -> Vec<Utf8PathBuf> {
        self.patterns
            .iter()
            .map(|pattern| self.assembler.staging.join(glob_base(pattern)))
            .collect()
    }

    fn run(&self, _: &TaskContext) -> anyhow::Result<StageOutput> {
        let fragments = expand_ordered(&self.assembler.source, &self.patterns)?;

        if fragments.contains(&self.library_output) {
            anyhow::bail!(
                "Application fragment '{}' would overwrite the library unit",
                self.library_output
            );
        }

        let staged = self.assembler.stage_application(&fragments)?;

        Ok(StageOutput {
            written: staged,
            warnings: Vec::new(),
        })
    }
}
