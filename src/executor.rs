//! Wave-based parallel executor for a [`TaskGraph`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;
use serde::Serialize;
use tracing::{Level, info, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::cache::{CacheStats, CacheStore};
use crate::config::Config;
use crate::error::{BuildError, ConfigError};
use crate::graph::{TaskGraph, TaskId};
use crate::stage::StageOutput;
use crate::toolchain::Toolchain;

/// Shared state of a single build invocation.
pub struct Environment {
    pub config: Config,
    pub cache: CacheStore,
    pub toolchain: Toolchain,
}

impl Environment {
    /// Environment for `config`, with the cache below its cache directory and
    /// the toolchain it selects.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Ok(Self {
            cache: CacheStore::open(config.cache_dir()),
            toolchain: Toolchain::from_config(&config)?,
            config,
        })
    }
}

/// The context passed to every task execution.
pub struct TaskContext<'a> {
    pub env: &'a Environment,
    /// Tracing span assigned to this task.
    pub span: tracing::Span,
}

impl std::ops::Deref for TaskContext<'_> {
    type Target = Environment;

    fn deref(&self) -> &Self::Target {
        self.env
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub wave: usize,
    /// Offset from the start of the build.
    pub start_ms: u64,
    pub duration_ms: u64,
    pub output: StageOutput,
}

/// Summary of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub waves: Vec<Vec<TaskId>>,
    /// Reports in completion order.
    pub tasks: Vec<TaskReport>,
    pub cache: CacheStats,
    pub duration_ms: u64,
}

impl BuildResult {
    pub fn report(&self, id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|report| report.id == id)
    }

    pub fn warnings(&self) -> impl Iterator<Item = (&TaskId, &String)> {
        self.tasks
            .iter()
            .flat_map(|report| report.output.warnings.iter().map(move |w| (&report.id, w)))
    }
}

enum Outcome {
    Done(anyhow::Result<StageOutput>),
    /// Not started because another task in the wave had already failed.
    Skipped,
}

/// Runs every task of `graph`, one wave at a time.
///
/// All tasks of a wave are spawned on the Rayon pool at once and the next
/// wave is only released after every task of the current one has finished.
/// The first failing task aborts the build: tasks of the same wave which
/// haven't started yet are skipped, running ones finish but their results
/// are discarded, and no further wave is dispatched.
pub fn execute(graph: &TaskGraph, env: &Environment) -> Result<BuildResult, BuildError> {
    let build_start = Instant::now();

    let root_span = tracing::span!(Level::INFO, "build");
    root_span.pb_set_length(graph.len() as u64);
    root_span.pb_set_style(&crate::utils::get_style_build()?);
    root_span.pb_set_message("Building...");
    let _enter = root_span.enter();

    let pb_style = crate::utils::get_style_task()?;
    let mut reports = Vec::new();

    for (wave, members) in graph.waves.iter().enumerate() {
        let abort = AtomicBool::new(false);
        let (sender, receiver) = channel::<(NodeIndex, Outcome, Instant, Duration)>();

        rayon::scope(|s| {
            for &index in members {
                let task = &graph.graph[index];
                let sender = sender.clone();
                let pb_style = pb_style.clone();
                let root_span = root_span.clone();
                let abort = &abort;

                s.spawn(move |_| {
                    let start = Instant::now();

                    if abort.load(Ordering::SeqCst) {
                        sender.send((index, Outcome::Skipped, start, Duration::ZERO)).ok();
                        return;
                    }

                    let span = tracing::span!(parent: &root_span, Level::INFO, "task", id = %task.id);
                    span.pb_set_style(&pb_style);
                    span.pb_set_message(&format!("Running {}", task.id));
                    let _enter = span.enter();

                    let ctx = TaskContext {
                        env,
                        span: span.clone(),
                    };

                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        task.run(&ctx)
                    }))
                    .unwrap_or_else(|panic| {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Task panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Task panicked: {s}")
                        } else {
                            String::from("Task panicked with unknown payload")
                        };

                        Err(anyhow::anyhow!(msg))
                    });

                    if result.is_err() {
                        abort.store(true, Ordering::SeqCst);
                    }

                    root_span.pb_inc(1);
                    sender
                        .send((index, Outcome::Done(result), start, start.elapsed()))
                        .ok();
                });
            }
        });

        drop(sender);

        // Results arrive in completion order, the first error wins.
        let mut failure = None;

        for (index, outcome, start, duration) in receiver {
            let id = graph.graph[index].id.clone();

            match outcome {
                Outcome::Done(Ok(output)) if failure.is_none() => {
                    info!(task = %id, written = output.written.len(), "{} {}", id, crate::utils::as_millis(duration));

                    for warning in &output.warnings {
                        warn!(task = %id, "{warning}");
                    }

                    reports.push(TaskReport {
                        id,
                        wave,
                        start_ms: start.duration_since(build_start).as_millis() as u64,
                        duration_ms: duration.as_millis() as u64,
                        output,
                    });
                }
                Outcome::Done(Ok(_)) | Outcome::Skipped => {}
                Outcome::Done(Err(cause)) => {
                    if failure.is_none() {
                        failure = Some(BuildError::Task { id, cause });
                    } else {
                        warn!(task = %id, "also failed: {cause:#}");
                    }
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
    }

    info!("Build complete {}", crate::utils::as_overhead(build_start));

    Ok(BuildResult {
        waves: graph.waves(),
        tasks: reports,
        cache: env.cache.stats(),
        duration_ms: build_start.elapsed().as_millis() as u64,
    })
}
