//! Script bundling.
//!
//! A [`BundleSpec`] describes one output file. The [`BundleBuilder`] has the
//! toolchain's bundler resolve the static import graph of its entry into a
//! single unit and then applies its output policy:
//!
//! * module format keeps the entry's exports and is only minified,
//! * self-executing format drops every export, wraps the code in a function
//!   expression that runs immediately and, given a baseline, transpiles the
//!   result for it before minifying.

mod baseline;
mod esbuild;
mod swc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::debug;

pub use baseline::{Baseline, Engine};
pub use esbuild::{Esbuild, EsbuildError};
pub use swc::Swc;

#[cfg(test)]
pub(crate) use esbuild::testing;

use crate::core::Artifact;
use crate::error::BundleError;
use crate::executor::TaskContext;
use crate::stage::{StageOutput, TransformStage};
use crate::toolchain::Toolchain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// ES module, `import`/`export` preserved at the entry.
    Module,
    /// One function expression invoked in place, no module syntax left.
    SelfExecuting,
}

#[derive(Debug, Clone)]
pub struct BundleSpec {
    pub entry: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub format: OutputFormat,
    /// Oldest runtime the output has to run on; only self-executing bundles
    /// are transpiled.
    pub baseline: Option<Baseline>,
    pub minify: bool,
}

impl BundleSpec {
    /// Module variant for runtimes that load ES modules.
    pub fn modern(entry: impl Into<Utf8PathBuf>, output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            entry: entry.into(),
            output: output.into(),
            format: OutputFormat::Module,
            baseline: None,
            minify: true,
        }
    }

    /// Transpiled, self-executing variant for older runtimes.
    pub fn legacy(
        entry: impl Into<Utf8PathBuf>,
        output: impl Into<Utf8PathBuf>,
        baseline: Baseline,
    ) -> Self {
        Self {
            entry: entry.into(),
            output: output.into(),
            format: OutputFormat::SelfExecuting,
            baseline: Some(baseline),
            minify: true,
        }
    }

    /// Self-executing but not transpiled, for runtimes with everything modern
    /// except modules.
    pub fn classic(entry: impl Into<Utf8PathBuf>, output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            entry: entry.into(),
            output: output.into(),
            format: OutputFormat::SelfExecuting,
            baseline: None,
            minify: true,
        }
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }
}

pub struct BundleBuilder<'a> {
    toolchain: &'a Toolchain,
}

impl<'a> BundleBuilder<'a> {
    pub fn new(toolchain: &'a Toolchain) -> Self {
        Self { toolchain }
    }

    /// Builds the bundle described by `spec`, reading its sources from disk.
    pub fn build(&self, spec: &BundleSpec) -> Result<Artifact, BundleError> {
        if !spec.entry.is_file() {
            return Err(BundleError::MissingEntry(spec.entry.clone()));
        }

        debug!(entry = %spec.entry, format = ?spec.format, "bundling");

        let mut code = self
            .toolchain
            .bundler
            .bundle(&spec.entry, spec.format)
            .map_err(|cause| BundleError::Bundle {
                entry: spec.entry.clone(),
                cause,
            })?;

        if let (OutputFormat::SelfExecuting, Some(baseline)) = (spec.format, &spec.baseline) {
            code = self
                .toolchain
                .transpiler
                .transpile(&code, baseline)
                .map_err(|cause| BundleError::Transpile {
                    baseline: baseline.to_string(),
                    cause,
                })?;
        }

        if spec.minify {
            code = self
                .toolchain
                .script_minifier
                .minify(&code, spec.baseline.as_ref())
                .map_err(BundleError::Minify)?;
        }

        Ok(Artifact::new(spec.output.clone(), code))
    }
}

/// Stage writing one bundle.
pub struct BundleStage {
    pub spec: BundleSpec,
}

impl TransformStage for BundleStage {
    fn inputs(&self) -> Vec<Utf8PathBuf> {
        self.spec.entry.parent().map(Utf8Path::to_owned).into_iter().collect()
    }

    fn outputs(&self) -> Vec<Utf8PathBuf> {
        vec![self.spec.output.clone()]
    }

    fn run(&self, ctx: &TaskContext) -> anyhow::Result<StageOutput> {
        let artifact = BundleBuilder::new(&ctx.toolchain).build(&self.spec)?;
        crate::utils::write_file(&artifact.path, &artifact.bytes)?;

        debug!(path = %artifact.path, bytes = artifact.len(), hash = %artifact.hash, "bundle written");
        Ok(StageOutput::default().written(artifact.path))
    }
}
