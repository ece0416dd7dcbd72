//! The task graph.
//!
//! A [`Task`] is a named unit of work with declared inputs, declared outputs
//! and explicit dependencies on other tasks. Tasks are organized into a
//! Directed Acyclic Graph, which is validated once at construction:
//!
//! * every dependency names an existing task and ids are unique,
//! * the graph is acyclic and has exactly one sink ("build complete"),
//! * two tasks that are not ordered by a dependency path never declare
//!   overlapping outputs.
//!
//! Execution order is derived from the graph as a list of *waves*. A task's
//! wave is one past the deepest wave among its dependencies, so every task in
//! a wave has all of its dependencies satisfied by earlier waves.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use camino::Utf8PathBuf;
use petgraph::Graph;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::NodeIndex;

use crate::error::GraphError;
use crate::executor::TaskContext;
use crate::stage::{StageOutput, TransformStage};

/// Identifier of a task, unique within a graph.
pub type TaskId = Cow<'static, str>;

type TaskFn = Arc<dyn Fn(&TaskContext) -> anyhow::Result<StageOutput> + Send + Sync>;

/// A single node of the build graph.
///
/// Declared inputs and outputs are on-disk paths, each standing for the file
/// itself or for everything below it when it is a directory.
#[derive(Clone)]
pub struct Task {
    pub id: TaskId,
    pub inputs: Vec<Utf8PathBuf>,
    pub outputs: Vec<Utf8PathBuf>,
    pub depends_on: Vec<TaskId>,
    action: TaskFn,
}

impl Task {
    pub fn new<F>(id: impl Into<TaskId>, action: F) -> Self
    where
        F: Fn(&TaskContext) -> anyhow::Result<StageOutput> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            depends_on: Vec::new(),
            action: Arc::new(action),
        }
    }

    /// Wraps a stage, taking its declared inputs and outputs.
    pub fn from_stage<S>(id: impl Into<TaskId>, stage: S) -> Self
    where
        S: TransformStage + 'static,
    {
        let inputs = stage.inputs();
        let outputs = stage.outputs();

        Self {
            inputs,
            outputs,
            ..Self::new(id, move |ctx| stage.run(ctx))
        }
    }

    pub fn inputs(mut self, inputs: impl IntoIterator<Item = impl Into<Utf8PathBuf>>) -> Self {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn outputs(mut self, outputs: impl IntoIterator<Item = impl Into<Utf8PathBuf>>) -> Self {
        self.outputs.extend(outputs.into_iter().map(Into::into));
        self
    }

    pub fn after(mut self, dependency: impl Into<TaskId>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    pub(crate) fn run(&self, ctx: &TaskContext) -> anyhow::Result<StageOutput> {
        (self.action)(ctx)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// A validated task DAG together with its execution waves.
pub struct TaskGraph {
    pub(crate) graph: Graph<Task, ()>,
    pub(crate) waves: Vec<Vec<NodeIndex>>,
}

impl TaskGraph {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Result<Self, GraphError> {
        let mut graph = Graph::new();
        let mut index: HashMap<TaskId, NodeIndex> = HashMap::new();

        for task in tasks {
            if index.contains_key(&task.id) {
                return Err(GraphError::DuplicateTask(task.id));
            }

            let id = task.id.clone();
            index.insert(id, graph.add_node(task));
        }

        let mut edges = Vec::new();
        for node in graph.node_indices() {
            let task: &Task = &graph[node];

            for dependency in &task.depends_on {
                let Some(&source) = index.get(dependency) else {
                    return Err(GraphError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dependency.clone(),
                    });
                };
                edges.push((source, node));
            }
        }

        for (source, target) in edges {
            graph.update_edge(source, target, ());
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(graph[cycle.node_id()].id.clone()))?;

        let sinks: Vec<_> = graph
            .node_indices()
            .filter(|&n| {
                graph
                    .neighbors_directed(n, petgraph::Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect();

        if sinks.len() != 1 {
            return Err(GraphError::Sink(
                sinks.into_iter().map(|n| graph[n].id.clone()).collect(),
            ));
        }

        check_outputs(&graph)?;

        let waves = compute_waves(&graph, &order);
        Ok(Self { graph, waves })
    }

    /// Task ids grouped by execution wave.
    pub fn waves(&self) -> Vec<Vec<TaskId>> {
        self.waves
            .iter()
            .map(|wave| wave.iter().map(|&n| self.graph[n].id.clone()).collect())
            .collect()
    }

    /// The wave a task runs in.
    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|&n| self.graph[n].id == id))
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.graph
            .node_indices()
            .map(|n| &self.graph[n])
            .find(|task| task.id == id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

/// Level of each node is one past the deepest level of its dependencies.
fn compute_waves(graph: &Graph<Task, ()>, order: &[NodeIndex]) -> Vec<Vec<NodeIndex>> {
    let mut level: HashMap<NodeIndex, usize> = HashMap::new();

    for &node in order {
        let depth = graph
            .neighbors_directed(node, petgraph::Direction::Incoming)
            .map(|dep| level[&dep] + 1)
            .max()
            .unwrap_or(0);
        level.insert(node, depth);
    }

    let count = level.values().copied().max().map_or(0, |max| max + 1);
    let mut waves = vec![Vec::new(); count];

    for node in graph.node_indices() {
        waves[level[&node]].push(node);
    }

    waves
}

fn check_outputs(graph: &Graph<Task, ()>) -> Result<(), GraphError> {
    let nodes: Vec<_> = graph.node_indices().collect();

    for (i, &a) in nodes.iter().enumerate() {
        for &b in &nodes[i + 1..] {
            let conflict = graph[a].outputs.iter().find_map(|x| {
                graph[b]
                    .outputs
                    .iter()
                    .find(|y| x.starts_with(y) || y.starts_with(x))
                    .map(|y| if x.starts_with(y) { x } else { y })
            });

            let Some(path) = conflict else {
                continue;
            };

            let ordered =
                has_path_connecting(graph, a, b, None) || has_path_connecting(graph, b, a, None);

            if !ordered {
                return Err(GraphError::OutputConflict {
                    first: graph[a].id.clone(),
                    second: graph[b].id.clone(),
                    path: path.clone(),
                });
            }
        }
    }

    Ok(())
}

impl std::fmt::Display for TaskGraph {
    /// Renders the graph as a Mermaid flowchart.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].id.replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.edge_indices() {
            if let Some((source, target)) = self.graph.edge_endpoints(edge) {
                writeln!(f, "    {} --> {}", source.index(), target.index())?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(id: &'static str) -> Task {
        Task::new(id, |_| Ok(StageOutput::default()))
    }

    #[test]
    fn waves_follow_dependency_depth() {
        let graph = TaskGraph::new([
            noop("clean"),
            noop("styles").after("clean"),
            noop("worker-lib").after("clean"),
            noop("worker-prep").after("worker-lib"),
            noop("worker").after("worker-prep"),
            noop("finish").after("styles").after("worker"),
        ])
        .unwrap();

        assert_eq!(
            graph.waves(),
            vec![
                vec![TaskId::from("clean")],
                vec!["styles".into(), "worker-lib".into()],
                vec!["worker-prep".into()],
                vec!["worker".into()],
                vec!["finish".into()],
            ]
        );
        assert_eq!(graph.wave_of("worker"), Some(3));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = TaskGraph::new([noop("a").after("nope")]).err().unwrap();
        assert!(matches!(err, GraphError::UnknownDependency { dependency, .. } if dependency == "nope"));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let err = TaskGraph::new([noop("a"), noop("a")]).err().unwrap();
        assert!(matches!(err, GraphError::DuplicateTask(id) if id == "a"));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = TaskGraph::new([noop("a").after("b"), noop("b").after("a"), noop("c")])
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn multiple_sinks_are_rejected() {
        let err = TaskGraph::new([noop("root"), noop("a").after("root"), noop("b").after("root")])
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::Sink(sinks) if sinks.len() == 2));
    }

    #[test]
    fn concurrent_tasks_must_not_share_outputs() {
        let err = TaskGraph::new([
            noop("root"),
            noop("a").after("root").outputs(["/dist/scripts"]),
            noop("b").after("root").outputs(["/dist/scripts/main.js"]),
            noop("end").after("a").after("b"),
        ])
        .err()
        .unwrap();

        assert!(matches!(
            err,
            GraphError::OutputConflict { path, .. } if path == "/dist/scripts/main.js"
        ));
    }

    #[test]
    fn ordered_tasks_may_share_outputs() {
        let graph = TaskGraph::new([
            noop("clean").outputs(["/dist"]),
            noop("copy").after("clean").outputs(["/dist/robots.txt"]),
            noop("end").after("copy").outputs(["/dist"]),
        ]);

        assert!(graph.is_ok());
    }

    #[test]
    fn mermaid_rendering_lists_edges() {
        let graph = TaskGraph::new([noop("a"), noop("b").after("a")]).unwrap();
        let text = graph.to_string();

        assert!(text.starts_with("graph LR"));
        assert!(text.contains("0[\"a\"]"));
        assert!(text.contains("0 --> 1"));
    }
}
