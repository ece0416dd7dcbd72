use tracing::{error, info};

use crate::blueprint::{plan, preflight};
use crate::config::Config;
use crate::error::BuildError;
use crate::executor::{BuildResult, Environment, execute};
use crate::graph::TaskGraph;

/// A project ready to be built or served.
///
/// ```rust,no_run
/// use tsumiki::{Config, Website};
///
/// let website = Website::new(Config::load(".")?)?;
/// website.build()?;
/// # Ok::<(), tsumiki::BuildError>(())
/// ```
pub struct Website {
    env: Environment,
}

impl Website {
    pub fn new(config: Config) -> Result<Self, BuildError> {
        Ok(Self {
            env: Environment::new(config)?,
        })
    }

    /// Wraps an environment assembled by the caller, e.g. with a replaced
    /// toolchain.
    pub fn with_environment(env: Environment) -> Self {
        Self { env }
    }

    pub fn config(&self) -> &Config {
        &self.env.config
    }

    pub fn plan(&self) -> Result<TaskGraph, BuildError> {
        plan(&self.env.config)
    }

    /// Checks the environment, then runs the whole graph.
    ///
    /// On failure the distribution tree is left as the failing wave found it
    /// and must be treated as incomplete.
    pub fn build(&self) -> Result<BuildResult, BuildError> {
        preflight(&self.env.config)?;

        let graph = self.plan()?;
        info!(tasks = graph.len(), waves = graph.waves.len(), "Build plan ready");

        execute(&graph, &self.env).inspect_err(|e| {
            error!("Build failed, {} is incomplete", self.env.config.dist_dir());
            if let Some(id) = e.task_id() {
                error!(task = id, "first failing task");
            }
        })
    }

    /// Serves the distribution tree until the process is stopped.
    #[cfg(feature = "server")]
    pub fn serve(&self, host: &str, port: u16) -> anyhow::Result<()> {
        crate::serve::serve(&self.env.config.dist_dir(), host, port)
    }
}
