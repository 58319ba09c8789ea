// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::dag::job::Job;
use crate::errors::{DbxTesterError, Result};
use crate::types::TriggerMode;

/// Stable handle of a node inside one [`ExecutionGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct NodeIndex(pub usize);

impl NodeIndex {
    pub const ROOT: NodeIndex = NodeIndex(0);
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Flat, indexed form of a job tree.
///
/// - `nodes` is an arena in depth-first discovery order; the root is index 0.
/// - `dependencies[i]` holds the nodes `i` waits for.
/// - `dependents[i]` holds the nodes that `i`'s success may unblock.
/// - `entry_points` holds the nodes without dependencies.
///
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    nodes: Vec<Job>,
    dependencies: Vec<BTreeSet<NodeIndex>>,
    dependents: Vec<BTreeSet<NodeIndex>>,
    entry_points: BTreeSet<NodeIndex>,
}

impl ExecutionGraph {
    /// Shorthand for [`DependencyGraphBuilder::build`].
    pub fn from_root(root: &Job) -> Result<Self> {
        DependencyGraphBuilder::build(root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &Job {
        &self.nodes[NodeIndex::ROOT.0]
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Job> {
        self.nodes.get(index.0)
    }

    /// All node indices in arena order.
    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        (0..self.nodes.len()).map(NodeIndex)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Job)> {
        self.nodes.iter().enumerate().map(|(i, job)| (NodeIndex(i), job))
    }

    /// Nodes that `index` depends on.
    pub fn dependencies_of(&self, index: NodeIndex) -> &BTreeSet<NodeIndex> {
        &self.dependencies[index.0]
    }

    /// Nodes that depend on `index`.
    pub fn dependents_of(&self, index: NodeIndex) -> &BTreeSet<NodeIndex> {
        &self.dependents[index.0]
    }

    pub fn entry_points(&self) -> &BTreeSet<NodeIndex> {
        &self.entry_points
    }

    /// The aggregating root, if the root job is declared with `trigger = wait`.
    pub fn aggregator(&self) -> Option<NodeIndex> {
        (self.root().trigger() == TriggerMode::Wait).then_some(NodeIndex::ROOT)
    }

    /// Index of the node holding `job`, if `job` is part of this graph.
    pub fn index_of(&self, job: &Job) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .position(|candidate| candidate.same_job(job))
            .map(NodeIndex)
    }

    /// Index of the first node with the given key.
    pub fn index_of_key(&self, key: &str) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .position(|job| job.key() == key)
            .map(NodeIndex)
    }
}

/// One unit of work on the builder's explicit stack.
enum Visit<'a> {
    /// Visit `job`, which was reached from `dependent` (`None` for the root).
    Enter {
        job: &'a Job,
        dependent: Option<NodeIndex>,
    },
    /// All dependencies of the job with this uid have been walked.
    Leave(u64),
}

/// Flattens a job tree into an [`ExecutionGraph`].
pub struct DependencyGraphBuilder;

impl DependencyGraphBuilder {
    /// Walk `root` depth-first and build the indexed graph.
    ///
    /// A job reached again through a different path reuses its index. A job
    /// reached while still on the walk path is a cycle and fails the whole
    /// build with [`DbxTesterError::CircularDependency`]. Jobs from
    /// [`JobBuilder`](crate::dag::JobBuilder) are frozen before their
    /// dependents exist, so that check only guards the walk; plan files
    /// reject cycles during validation.
    pub fn build(root: &Job) -> Result<ExecutionGraph> {
        let mut nodes: Vec<Job> = Vec::new();
        let mut dependencies: Vec<BTreeSet<NodeIndex>> = Vec::new();
        let mut dependents: Vec<BTreeSet<NodeIndex>> = Vec::new();
        let mut entry_points: BTreeSet<NodeIndex> = BTreeSet::new();

        let mut index_of: HashMap<u64, NodeIndex> = HashMap::new();
        let mut on_path: HashSet<u64> = HashSet::new();

        let mut stack = vec![Visit::Enter {
            job: root,
            dependent: None,
        }];

        while let Some(visit) = stack.pop() {
            let (job, dependent) = match visit {
                Visit::Leave(uid) => {
                    on_path.remove(&uid);
                    continue;
                }
                Visit::Enter { job, dependent } => (job, dependent),
            };

            if on_path.contains(&job.uid()) {
                return Err(DbxTesterError::CircularDependency(format!(
                    "job '{}' depends on itself through its dependency chain",
                    job.key()
                )));
            }

            let index = match index_of.get(&job.uid()) {
                Some(&existing) => {
                    debug!(job = %job.key(), index = %existing, "shared dependency; reusing node");
                    if let Some(dependent) = dependent {
                        dependencies[dependent.0].insert(existing);
                        dependents[existing.0].insert(dependent);
                    }
                    continue;
                }
                None => NodeIndex(nodes.len()),
            };

            nodes.push(job.clone());
            dependencies.push(BTreeSet::new());
            dependents.push(BTreeSet::new());
            index_of.insert(job.uid(), index);

            if let Some(dependent) = dependent {
                dependencies[dependent.0].insert(index);
                dependents[index.0].insert(dependent);
            }

            if job.depends_on().is_empty() {
                entry_points.insert(index);
            }

            on_path.insert(job.uid());
            stack.push(Visit::Leave(job.uid()));

            // Reverse so that dependencies are popped in declared order.
            for dep in job.depends_on().iter().rev() {
                stack.push(Visit::Enter {
                    job: dep,
                    dependent: Some(index),
                });
            }
        }

        debug!(
            root = %root.key(),
            nodes = nodes.len(),
            entry_points = entry_points.len(),
            "built execution graph"
        );

        Ok(ExecutionGraph {
            nodes,
            dependencies,
            dependents,
            entry_points,
        })
    }
}
