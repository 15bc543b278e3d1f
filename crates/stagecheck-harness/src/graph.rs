//! Minimal build-graph interface and a sequential in-process executor.
//!
//! The adapter only needs three things from a scheduler: create a named unit
//! with a callback, declare a dependency edge, and register a unit under a
//! top-level target. Any build system that offers those can drive the suite;
//! [`LocalGraph`] is the one bundled here.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::error::UnitError;

pub type UnitAction = Box<dyn FnOnce() -> Result<(), UnitError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(usize);

impl UnitId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown unit {0}")]
    UnknownUnit(UnitId),
    #[error("no units registered under target '{0}'")]
    UnknownTarget(String),
    #[error("dependency cycle through '{0}'")]
    Cycle(String),
}

/// What the harness requires of a scheduler.
pub trait StepGraph {
    /// Create a unit. It runs at most once, after all of its dependencies
    /// succeeded.
    fn add_unit(&mut self, name: String, action: UnitAction) -> UnitId;

    /// `unit` runs only after `dependency` succeeded.
    fn depend_on(&mut self, unit: UnitId, dependency: UnitId) -> Result<(), GraphError>;

    /// Make `unit` reachable from the top-level `target`.
    fn register_root(&mut self, target: &str, unit: UnitId) -> Result<(), GraphError>;
}

#[derive(Debug)]
pub enum UnitOutcome {
    Succeeded,
    Failed(UnitError),
    /// Skipped because a dependency did not succeed.
    DependencyFailed { dependency: String },
}

impl UnitOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[derive(Debug)]
pub struct UnitReport {
    pub id: UnitId,
    pub name: String,
    pub outcome: UnitOutcome,
}

/// Outcomes of every unit reached from a target, in execution order.
#[derive(Debug, Default)]
pub struct GraphRun {
    pub units: Vec<UnitReport>,
}

impl GraphRun {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.units.iter().filter(|u| u.outcome.is_success()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.units
            .iter()
            .filter(|u| matches!(u.outcome, UnitOutcome::Failed(_)))
            .count()
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.units.iter().all(|u| u.outcome.is_success())
    }
}

struct Node {
    name: String,
    action: Option<UnitAction>,
    deps: Vec<UnitId>,
}

/// Runs units one at a time in dependency order. A failed unit stops only the
/// units that depend on it.
#[derive(Default)]
pub struct LocalGraph {
    nodes: Vec<Node>,
    roots: BTreeMap<String, Vec<UnitId>>,
}

impl fmt::Debug for LocalGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalGraph")
            .field("units", &self.nodes.len())
            .field("targets", &self.roots.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl LocalGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn name(&self, id: UnitId) -> Option<&str> {
        self.nodes.get(id.0).map(|n| n.name.as_str())
    }

    #[must_use]
    pub fn dependencies(&self, id: UnitId) -> &[UnitId] {
        self.nodes
            .get(id.0)
            .map(|n| n.deps.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn roots(&self, target: &str) -> &[UnitId] {
        self.roots
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn check(&self, id: UnitId) -> Result<(), GraphError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownUnit(id))
        }
    }

    /// Dependency-first order of every unit reachable from `target`.
    pub fn schedule(&self, target: &str) -> Result<Vec<UnitId>, GraphError> {
        let roots = self
            .roots
            .get(target)
            .ok_or_else(|| GraphError::UnknownTarget(target.to_string()))?;
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut order = Vec::new();
        for &root in roots {
            self.visit(root, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        id: UnitId,
        marks: &mut [Mark],
        order: &mut Vec<UnitId>,
    ) -> Result<(), GraphError> {
        match marks[id.0] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(GraphError::Cycle(self.nodes[id.0].name.clone())),
            Mark::Unvisited => {}
        }
        marks[id.0] = Mark::InProgress;
        for &dep in &self.nodes[id.0].deps {
            self.visit(dep, marks, order)?;
        }
        marks[id.0] = Mark::Done;
        order.push(id);
        Ok(())
    }

    /// Execute everything reachable from `target`. Consumes the graph: each
    /// unit's action runs at most once.
    pub fn run(mut self, target: &str) -> Result<GraphRun, GraphError> {
        let order = self.schedule(target)?;
        let mut succeeded = vec![false; self.nodes.len()];
        let mut run = GraphRun::default();

        for id in order {
            let blocked = self.nodes[id.0]
                .deps
                .iter()
                .find(|dep| !succeeded[dep.0])
                .copied();
            let outcome = if let Some(dep) = blocked {
                UnitOutcome::DependencyFailed {
                    dependency: self.nodes[dep.0].name.clone(),
                }
            } else {
                match self.nodes[id.0].action.take() {
                    Some(action) => match action() {
                        Ok(()) => UnitOutcome::Succeeded,
                        Err(err) => UnitOutcome::Failed(err),
                    },
                    None => UnitOutcome::Succeeded,
                }
            };
            succeeded[id.0] = outcome.is_success();
            run.units.push(UnitReport {
                id,
                name: self.nodes[id.0].name.clone(),
                outcome,
            });
        }
        Ok(run)
    }
}

impl StepGraph for LocalGraph {
    fn add_unit(&mut self, name: String, action: UnitAction) -> UnitId {
        self.nodes.push(Node {
            name,
            action: Some(action),
            deps: Vec::new(),
        });
        UnitId(self.nodes.len() - 1)
    }

    fn depend_on(&mut self, unit: UnitId, dependency: UnitId) -> Result<(), GraphError> {
        self.check(unit)?;
        self.check(dependency)?;
        if unit == dependency {
            return Err(GraphError::Cycle(self.nodes[unit.0].name.clone()));
        }
        let deps = &mut self.nodes[unit.0].deps;
        if !deps.contains(&dependency) {
            deps.push(dependency);
        }
        Ok(())
    }

    fn register_root(&mut self, target: &str, unit: UnitId) -> Result<(), GraphError> {
        self.check(unit)?;
        let roots = self.roots.entry(target.to_string()).or_default();
        if !roots.contains(&unit) {
            roots.push(unit);
        }
        Ok(())
    }
}
