//! Pluggable transform capabilities.
//!
//! Stages never hard-code a bundler, compressor, prefixer or transpiler. They ask the
//! [`Toolchain`] of the current build, which makes every capability
//! replaceable, e.g. by a counting stub in tests.

use std::sync::Arc;

use camino::Utf8Path;

use crate::bundle::{Baseline, Esbuild, OutputFormat, Swc};
use crate::config::{Config, TranspilerKind};
use crate::error::ConfigError;
use crate::stages::html::HtmlMinifier;
use crate::stages::styles::Lightning;

/// Makes an asset smaller in its own format.
pub trait Optimizer: Send + Sync {
    /// Cache namespace, it must change whenever the output for the same input
    /// would change.
    fn namespace(&self) -> String;

    /// The optimized bytes, or `None` when the format is not handled and the
    /// input should pass through unchanged.
    fn optimize(&self, path: &Utf8Path, bytes: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Adds vendor prefixes to a stylesheet.
pub trait Prefixer: Send + Sync {
    fn prefix(&self, path: &Utf8Path, css: &str) -> anyhow::Result<String>;
}

/// Shrinks text without changing its meaning. Script minifiers must not
/// introduce syntax beyond `target`.
pub trait Minifier: Send + Sync {
    fn minify(&self, source: &str, target: Option<&Baseline>) -> anyhow::Result<String>;
}

/// Resolves the static import graph of `entry` into a single script.
pub trait Bundler: Send + Sync {
    fn bundle(&self, entry: &Utf8Path, format: OutputFormat) -> anyhow::Result<String>;
}

/// Rewrites script syntax so it runs on `baseline`.
pub trait Transpiler: Send + Sync {
    fn transpile(&self, source: &str, baseline: &Baseline) -> anyhow::Result<String>;
}

/// Leaves every asset untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Optimizer for Passthrough {
    fn namespace(&self) -> String {
        "passthrough".into()
    }

    fn optimize(&self, _: &Utf8Path, _: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// The capability implementations used by one build.
#[derive(Clone)]
pub struct Toolchain {
    pub bundler: Arc<dyn Bundler>,
    pub transpiler: Arc<dyn Transpiler>,
    pub script_minifier: Arc<dyn Minifier>,
    pub prefixer: Arc<dyn Prefixer>,
    pub style_minifier: Arc<dyn Minifier>,
    pub html_minifier: Arc<dyn Minifier>,
    pub optimizer: Arc<dyn Optimizer>,
}

impl Toolchain {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let esbuild = Arc::new(Esbuild::new(config.toolchain.esbuild.clone()));

        let transpiler: Arc<dyn Transpiler> = match config.toolchain.transpiler {
            TranspilerKind::Swc => Arc::new(Swc),
            TranspilerKind::Esbuild => esbuild.clone(),
        };

        let lightning = Arc::new(Lightning::new(&config.styles.browsers)?);

        Ok(Self {
            bundler: esbuild.clone(),
            transpiler,
            script_minifier: esbuild,
            prefixer: lightning.clone(),
            style_minifier: lightning,
            html_minifier: Arc::new(HtmlMinifier),
            optimizer: default_optimizer(config),
        })
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }
}

#[cfg(feature = "image")]
fn default_optimizer(config: &Config) -> Arc<dyn Optimizer> {
    Arc::new(crate::stages::images::ImageOptimizer::new(config.images.jpeg_quality))
}

#[cfg(not(feature = "image"))]
fn default_optimizer(_: &Config) -> Arc<dyn Optimizer> {
    Arc::new(Passthrough)
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain")
            .field("optimizer", &self.optimizer.namespace())
            .finish_non_exhaustive()
    }
}
