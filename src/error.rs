use camino::Utf8PathBuf;
use thiserror::Error;

use crate::graph::TaskId;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task '{0}' is declared more than once")]
    DuplicateTask(TaskId),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("Cycle detected in task graph at task '{0}'")]
    Cycle(TaskId),

    #[error("Tasks '{first}' and '{second}' can run concurrently but both write '{path}'")]
    OutputConflict {
        first: TaskId,
        second: TaskId,
        path: Utf8PathBuf,
    },

    #[error("Task graph must have exactly one sink, found {0:?}")]
    Sink(Vec<TaskId>),
}

#[derive(Debug, Error)]
pub enum ClearError {
    #[error("Failed to remove {0}:\n{1}")]
    Remove(Utf8PathBuf, std::io::Error),

    #[error("Failed to create {0}:\n{1}")]
    Create(Utf8PathBuf, std::io::Error),
}

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("Source directory '{0}' does not exist")]
    MissingSource(Utf8PathBuf),

    #[error("'{0}' is written by more than one bundle")]
    SharedOutput(Utf8PathBuf),

    #[error("Invalid source pattern:\n{0:#}")]
    Pattern(anyhow::Error),

    #[error("The {what} '{path}' does not exist")]
    MissingEntry {
        what: &'static str,
        path: Utf8PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid task graph:\n{0}")]
    Graph(#[from] GraphError),

    #[error("Error while checking the build environment:\n{0}")]
    Preflight(#[from] PreflightError),

    #[error("Error while clearing build outputs:\n{0}")]
    Clear(#[from] ClearError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Template(#[from] indicatif::style::TemplateError),

    #[error("Task '{id}' failed:\n{cause:#}")]
    Task { id: TaskId, cause: anyhow::Error },

    #[error(transparent)]
    Other(anyhow::Error),
}

impl BuildError {
    /// The id of the task which aborted the build, if the failure came from a task.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            BuildError::Task { id, .. } => Some(id.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Entry point '{0}' does not exist")]
    MissingEntry(Utf8PathBuf),

    #[error("Couldn't bundle '{entry}':\n{cause:#}")]
    Bundle {
        entry: Utf8PathBuf,
        cause: anyhow::Error,
    },

    #[error("Transpilation to '{baseline}' failed:\n{cause:#}")]
    Transpile {
        baseline: String,
        cause: anyhow::Error,
    },

    #[error("Minification failed:\n{0:#}")]
    Minify(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {0}:\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't encode cache metadata:\n{0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file {0}:\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file {0}:\n{1}")]
    Parse(Utf8PathBuf, toml::de::Error),

    #[error("Invalid baseline '{0}', expected something like 'chrome41' or 'es2017'")]
    Baseline(String),

    #[error("Invalid browser version '{1}' for '{0}'")]
    BrowserVersion(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_names_the_task() {
        let err = BuildError::Task {
            id: "client-legacy".into(),
            cause: anyhow::anyhow!("boom"),
        };

        assert_eq!(err.task_id(), Some("client-legacy"));
        assert!(err.to_string().contains("client-legacy"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn bundle_error_keeps_the_tool_output() {
        let err = BundleError::Bundle {
            entry: "app/scripts/main.js".into(),
            cause: anyhow::anyhow!("Could not resolve \"./missing.js\""),
        };

        assert_eq!(
            err.to_string(),
            "Couldn't bundle 'app/scripts/main.js':\nCould not resolve \"./missing.js\""
        );
    }
}
