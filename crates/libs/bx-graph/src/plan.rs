//! Want-propagation and the ready queue.
//!
//! The plan tracks which edges the requested targets transitively require,
//! how many producing edges each of them still waits on, and which are
//! ready to run. Edges become ready in FIFO order as their dependencies
//! finish.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::prelude::*;
use crate::state::{EdgeId, State};

#[derive(Debug, Default)]
pub struct Plan {
    wanted: HashSet<EdgeId>,
    finished: HashSet<EdgeId>,
    unfinished_deps: HashMap<EdgeId, usize>,
    ready: VecDeque<EdgeId>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the edge producing `target` (and transitively everything it
    /// depends on) as wanted. Targets without a producing edge are source
    /// files and need no work.
    pub fn want_target(&mut self, state: &State, target: &str) -> Result<()> {
        if let Some(edge_id) = state.producer(target) {
            let mut visiting = Vec::new();
            self.want_edge(state, edge_id, &mut visiting)?;
        }
        Ok(())
    }

    fn want_edge(
        &mut self,
        state: &State,
        edge_id: EdgeId,
        visiting: &mut Vec<EdgeId>,
    ) -> Result<()> {
        if visiting.contains(&edge_id) {
            let output = state
                .edge(edge_id)
                .outputs
                .first()
                .cloned()
                .unwrap_or_default();
            return Err(Error::DependencyCycle(output));
        }
        if self.wanted.contains(&edge_id) {
            return Ok(());
        }
        self.wanted.insert(edge_id);
        visiting.push(edge_id);

        // Distinct producing edges; two inputs from one producer count once.
        let mut deps = HashSet::new();
        for input in &state.edge(edge_id).inputs {
            if let Some(producer) = state.producer(input) {
                deps.insert(producer);
            }
        }
        for &dep in &deps {
            self.want_edge(state, dep, visiting)?;
        }
        visiting.pop();

        let unfinished = deps.iter().filter(|d| !self.finished.contains(d)).count();
        self.unfinished_deps.insert(edge_id, unfinished);
        if unfinished == 0 {
            self.ready.push_back(edge_id);
        }
        Ok(())
    }

    /// Takes the next ready edge, if any.
    pub fn pop_ready(&mut self) -> Option<EdgeId> {
        self.ready.pop_front()
    }

    /// Records an edge as finished and readies dependents whose last
    /// dependency this was. Finishing an edge twice is a no-op.
    pub fn edge_finished(&mut self, state: &State, edge_id: EdgeId) {
        if !self.finished.insert(edge_id) {
            return;
        }

        let mut dependents = HashSet::new();
        for output in &state.edge(edge_id).outputs {
            for &consumer in state.consumers(output) {
                dependents.insert(consumer);
            }
        }
        for dependent in dependents {
            if !self.wanted.contains(&dependent) || self.finished.contains(&dependent) {
                continue;
            }
            if let Some(count) = self.unfinished_deps.get_mut(&dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.ready.push_back(dependent);
                }
            }
        }
    }

    pub fn is_finished(&self, edge_id: EdgeId) -> bool {
        self.finished.contains(&edge_id)
    }

    pub fn wanted_count(&self) -> usize {
        self.wanted.len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    /// Whether any wanted edge is still unfinished.
    pub fn more_to_do(&self) -> bool {
        self.wanted.len() > self.finished.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::BuildManifest;

    fn load(toml: &str) -> State {
        State::from_manifest(BuildManifest::from_toml(toml).unwrap()).unwrap()
    }

    #[test]
    fn chain_becomes_ready_in_dependency_order() {
        let state = load(
            r#"
            [[edges]]
            outputs = ["a.o"]
            inputs = ["a.c"]
            command = "compile"

            [[edges]]
            outputs = ["app"]
            inputs = ["a.o"]
            command = "link"
        "#,
        );
        let mut plan = Plan::new();
        plan.want_target(&state, "app").unwrap();
        assert_eq!(plan.wanted_count(), 2);

        let first = plan.pop_ready().unwrap();
        assert_eq!(first, 0);
        assert!(plan.pop_ready().is_none());

        plan.edge_finished(&state, first);
        assert_eq!(plan.pop_ready(), Some(1));
        plan.edge_finished(&state, 1);
        assert!(!plan.more_to_do());
    }

    #[test]
    fn shared_producer_counts_once() {
        // The link edge consumes two outputs of the same generator.
        let state = load(
            r#"
            [[edges]]
            outputs = ["gen.h", "gen.c"]
            command = "generate"

            [[edges]]
            outputs = ["app"]
            inputs = ["gen.h", "gen.c"]
            command = "link"
        "#,
        );
        let mut plan = Plan::new();
        plan.want_target(&state, "app").unwrap();

        let generator = plan.pop_ready().unwrap();
        plan.edge_finished(&state, generator);

        assert_eq!(plan.pop_ready(), Some(1));
        assert!(plan.pop_ready().is_none());
    }

    #[test]
    fn independent_targets_are_ready_immediately() {
        let state = load(
            r#"
            [[edges]]
            outputs = ["a.o"]
            command = "build a"

            [[edges]]
            outputs = ["b.o"]
            command = "build b"
        "#,
        );
        let mut plan = Plan::new();
        plan.want_target(&state, "a.o").unwrap();
        plan.want_target(&state, "b.o").unwrap();

        assert_eq!(plan.pop_ready(), Some(0));
        assert_eq!(plan.pop_ready(), Some(1));
    }

    #[test]
    fn cycle_is_an_error() {
        let state = load(
            r#"
            [[edges]]
            outputs = ["a"]
            inputs = ["b"]
            command = "a from b"

            [[edges]]
            outputs = ["b"]
            inputs = ["a"]
            command = "b from a"
        "#,
        );
        let mut plan = Plan::new();
        let result = plan.want_target(&state, "a");
        assert!(matches!(result, Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn finishing_twice_is_a_no_op() {
        let state = load(
            r#"
            [[edges]]
            outputs = ["a.o"]
            inputs = ["gen"]
            command = "compile"

            [[edges]]
            outputs = ["gen"]
            command = "generate"
        "#,
        );
        let mut plan = Plan::new();
        plan.want_target(&state, "a.o").unwrap();

        let generator = plan.pop_ready().unwrap();
        plan.edge_finished(&state, generator);
        plan.edge_finished(&state, generator);

        assert_eq!(plan.pop_ready(), Some(0));
        assert!(plan.pop_ready().is_none());
    }
}
