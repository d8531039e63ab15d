//! Dependency resolution: turns the registry into a linear execution plan.
//!
//! Kahn's algorithm over the "depends on" graph. Ready nodes are taken from a
//! min-heap keyed by `(run_order, name)`, so the plan is a pure function of
//! the definitions and never of their registration order.

use super::types::{MigrationDefinition, MigrationError};
use crate::utils::compute_sequence_hash;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet};

/// Ordered sequence of migrations to execute. Derived on every run, never stored.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    steps: Vec<MigrationDefinition>,
}

impl ExecutionPlan {
    pub fn steps(&self) -> &[MigrationDefinition] {
        &self.steps
    }

    pub fn names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// SHA-256 over the ordered names. Equal plans have equal fingerprints.
    pub fn fingerprint(&self) -> String {
        compute_sequence_hash(self.steps.iter().map(MigrationDefinition::name))
    }

    /// The steps not yet in `applied`, keeping their relative order.
    pub fn pending(&self, applied: &BTreeSet<String>) -> ExecutionPlan {
        ExecutionPlan {
            steps: self
                .steps
                .iter()
                .filter(|s| !applied.contains(s.name()))
                .cloned()
                .collect(),
        }
    }
}

/// Compute an execution order where every dependency precedes its dependents.
///
/// Ties between unrelated migrations are broken by ascending `run_order`, then
/// by name. Fails without producing any plan if a dependency is unknown, a
/// name is repeated, or the graph has a cycle.
pub fn resolve(definitions: &[MigrationDefinition]) -> Result<ExecutionPlan, MigrationError> {
    let mut index: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, def) in definitions.iter().enumerate() {
        if index.insert(def.name(), i).is_some() {
            return Err(MigrationError::DuplicateName(def.name().to_string()));
        }
    }

    // Walk in name order so the reported error is stable.
    for (&name, &i) in &index {
        if let Some(missing) = definitions[i]
            .dependencies()
            .iter()
            .find(|dep| !index.contains_key(dep.as_str()))
        {
            return Err(MigrationError::UnknownDependency {
                migration: name.to_string(),
                dependency: missing.clone(),
            });
        }
    }

    let mut in_degree: Vec<usize> = definitions.iter().map(|d| d.dependencies().len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); definitions.len()];
    for (i, def) in definitions.iter().enumerate() {
        for dep in def.dependencies() {
            dependents[index[dep.as_str()]].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<(i32, &str, usize)>> = definitions
        .iter()
        .enumerate()
        .filter(|(i, _)| in_degree[*i] == 0)
        .map(|(i, d)| Reverse((d.run_order(), d.name(), i)))
        .collect();

    let mut order: Vec<usize> = Vec::with_capacity(definitions.len());
    while let Some(Reverse((_, _, i))) = ready.pop() {
        order.push(i);
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                let d = &definitions[dependent];
                ready.push(Reverse((d.run_order(), d.name(), dependent)));
            }
        }
    }

    if order.len() < definitions.len() {
        let emitted: HashSet<usize> = order.into_iter().collect();
        let stuck: HashSet<usize> = (0..definitions.len())
            .filter(|i| !emitted.contains(i))
            .collect();
        return Err(MigrationError::CyclicDependency(cycle_members(
            definitions,
            &dependents,
            stuck,
        )));
    }

    Ok(ExecutionPlan {
        steps: order.into_iter().map(|i| definitions[i].clone()).collect(),
    })
}

/// Narrow the nodes Kahn could not emit down to those taking part in a cycle.
///
/// Nodes that only hang off a cycle (nothing stuck depends on them) are peeled
/// away repeatedly; what is left sits on or between cycles.
fn cycle_members(
    definitions: &[MigrationDefinition],
    dependents: &[Vec<usize>],
    mut stuck: HashSet<usize>,
) -> Vec<String> {
    loop {
        let leaves: Vec<usize> = stuck
            .iter()
            .copied()
            .filter(|i| !dependents[*i].iter().any(|d| stuck.contains(d)))
            .collect();
        if leaves.is_empty() {
            break;
        }
        for leaf in leaves {
            stuck.remove(&leaf);
        }
    }

    let mut names: Vec<String> = stuck
        .into_iter()
        .map(|i| definitions[i].name().to_string())
        .collect();
    names.sort();
    names
}
