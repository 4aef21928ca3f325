//! Dependency graph over the steps of one run

use super::error::GraphError;
use super::report::{GraphEdge, GraphNode, GraphView};
use super::step::{Step, StepStatus};
use crate::config::StepSpec;
use std::collections::{HashMap, HashSet};

/// Steps plus the adjacency derived from their `depends_on` lists.
///
/// Iteration follows insertion order so that cycle diagnostics and level
/// contents are reproducible between runs.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    steps: HashMap<String, Step>,
    order: Vec<String>,
    /// dependency -> dependents
    forward_edges: HashMap<String, Vec<String>>,
    /// dependent -> dependencies
    reverse_edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from step specifications.
    ///
    /// With `allow_duplicates` a repeated id replaces the earlier step,
    /// otherwise it is rejected.
    pub fn from_specs(specs: Vec<StepSpec>, allow_duplicates: bool) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for spec in specs {
            if !allow_duplicates && graph.contains(&spec.id) {
                return Err(GraphError::DuplicateStep(spec.id));
            }
            graph.add_step(Step::from(spec));
        }
        Ok(graph)
    }

    /// Insert or replace a step and record its edges
    pub fn add_step(&mut self, step: Step) {
        let id = step.id.clone();

        match self.steps.remove(&id) {
            Some(previous) => {
                tracing::warn!(step = %id, "Replacing step with duplicate id");
                for dep in &previous.depends_on {
                    if let Some(dependents) = self.forward_edges.get_mut(dep) {
                        dependents.retain(|d| d != &id);
                    }
                }
                if let Some(deps) = self.reverse_edges.get_mut(&id) {
                    deps.clear();
                }
            }
            None => self.order.push(id.clone()),
        }

        self.forward_edges.entry(id.clone()).or_default();
        self.reverse_edges.entry(id.clone()).or_default();

        for dep in &step.depends_on {
            self.forward_edges
                .entry(dep.clone())
                .or_default()
                .push(id.clone());
            self.reverse_edges.entry(dep.clone()).or_default();
            self.reverse_edges
                .entry(id.clone())
                .or_default()
                .push(dep.clone());
        }

        self.steps.insert(id, step);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps in insertion order
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(|id| self.steps.get(id))
    }

    /// Ids of steps that declared `id` as a dependency
    pub fn dependents(&self, id: &str) -> &[String] {
        self.forward_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids `id` declared as dependencies
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.reverse_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps with no declared dependencies
    pub fn root_steps(&self) -> Vec<&Step> {
        self.steps().filter(|s| s.depends_on.is_empty()).collect()
    }

    /// Pending steps whose dependencies have all completed.
    ///
    /// A dependency id with no step behind it counts as satisfied; `validate`
    /// is what rejects such references.
    pub fn ready_steps(&self) -> Vec<&Step> {
        self.steps()
            .filter(|s| s.status() == StepStatus::Pending)
            .filter(|s| {
                s.depends_on.iter().all(|dep| match self.steps.get(dep) {
                    Some(d) => d.status() == StepStatus::Completed,
                    None => true,
                })
            })
            .collect()
    }

    /// Find a dependency cycle.
    ///
    /// Returns the closed path, e.g. `[a, b, a]`; a self-loop yields `[a, a]`.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();

        for id in &self.order {
            if visited.contains(id.as_str()) {
                continue;
            }
            if let Some(cycle) = self.visit(id, &mut visited, &mut on_stack, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(id);
        on_stack.insert(id);
        path.push(id);

        for next in self.dependents(id) {
            if on_stack.contains(next.as_str()) {
                let start = path.iter().position(|p| *p == next.as_str()).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|p| p.to_string()).collect();
                cycle.push(next.clone());
                return Some(cycle);
            }
            if !visited.contains(next.as_str()) {
                if let Some(cycle) = self.visit(next, visited, on_stack, path) {
                    return Some(cycle);
                }
            }
        }

        on_stack.remove(id);
        path.pop();
        None
    }

    /// Group steps into levels with Kahn's algorithm.
    ///
    /// Every step lands in a later level than each of its dependencies.
    /// Dependency ids with no step behind them are ignored here.
    pub fn topological_sort(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut in_degree: HashMap<&str, usize> = self
            .steps()
            .map(|s| {
                let degree = s.depends_on.iter().filter(|d| self.contains(d)).count();
                (s.id.as_str(), degree)
            })
            .collect();

        let mut current: Vec<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut levels = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();

            let mut next = Vec::new();
            for id in &current {
                for dependent in self.dependents(id) {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            next.push(dependent.as_str());
                        }
                    }
                }
            }
            next.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
            next.dedup();

            levels.push(current.iter().map(|id| id.to_string()).collect());
            current = next;
        }

        if placed < self.len() {
            return Err(GraphError::SortIntegrity {
                placed,
                total: self.len(),
            });
        }

        Ok(levels)
    }

    /// Check every dependency reference exists and the graph is acyclic
    pub fn validate(&self) -> Result<(), GraphError> {
        for step in self.steps() {
            for dep in &step.depends_on {
                if !self.contains(dep) {
                    return Err(GraphError::MissingDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        if let Some(path) = self.detect_cycle() {
            return Err(GraphError::Cycle { path });
        }

        Ok(())
    }

    /// Skip every pending step that has a failed, skipped or cancelled
    /// dependency, repeating until nothing changes.
    ///
    /// Returns the ids skipped, in the order they were marked.
    pub fn propagate_skips(&mut self) -> Vec<String> {
        let mut skipped = Vec::new();

        loop {
            let pass: Vec<(String, String)> = self
                .steps()
                .filter(|s| s.status() == StepStatus::Pending)
                .filter_map(|s| self.skip_reason(s).map(|reason| (s.id.clone(), reason)))
                .collect();

            if pass.is_empty() {
                break;
            }

            for (id, reason) in pass {
                if let Some(step) = self.steps.get_mut(&id) {
                    match step.mark_skipped(reason.as_str()) {
                        Ok(()) => {
                            tracing::info!(step = %id, reason = %reason, "Skipping step");
                            skipped.push(id);
                        }
                        Err(e) => tracing::error!(error = %e, "Illegal skip transition"),
                    }
                }
            }
        }

        skipped
    }

    fn skip_reason(&self, step: &Step) -> Option<String> {
        let blocked_by = |status: StepStatus| -> Vec<&str> {
            step.depends_on
                .iter()
                .filter(|dep| self.steps.get(*dep).map(|d| d.status()) == Some(status))
                .map(String::as_str)
                .collect()
        };

        [StepStatus::Failed, StepStatus::Skipped, StepStatus::Cancelled]
            .into_iter()
            .find_map(|status| {
                let deps = blocked_by(status);
                (!deps.is_empty())
                    .then(|| format!("depends on {} step(s): {}", status, deps.join(", ")))
            })
    }

    /// Cancel every step still pending; returns how many were cancelled
    pub fn cancel_pending(&mut self) -> usize {
        let mut cancelled = 0;
        for id in &self.order {
            if let Some(step) = self.steps.get_mut(id) {
                if step.status() == StepStatus::Pending && step.mark_cancelled().is_ok() {
                    cancelled += 1;
                }
            }
        }
        cancelled
    }

    /// Count steps currently in `status`
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.values().filter(|s| s.status() == status).count()
    }

    /// Visualization snapshot
    pub fn view(&self) -> GraphView {
        let nodes = self
            .steps()
            .map(|s| GraphNode {
                id: s.id.clone(),
                label: s.action.clone(),
                status: s.status(),
            })
            .collect();

        let edges = self
            .steps()
            .flat_map(|s| {
                s.depends_on.iter().map(move |dep| GraphEdge {
                    from: dep.clone(),
                    to: s.id.clone(),
                })
            })
            .collect();

        GraphView { nodes, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(id: &str, deps: &[&str]) -> StepSpec {
        StepSpec {
            id: id.into(),
            action: "echo".into(),
            inputs: HashMap::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn graph(specs: Vec<StepSpec>) -> DependencyGraph {
        DependencyGraph::from_specs(specs, false).unwrap()
    }

    fn finish(graph: &mut DependencyGraph, id: &str) {
        let step = graph.get_mut(id).unwrap();
        step.mark_running().unwrap();
        step.mark_completed(json!(null), 1.0).unwrap();
    }

    fn fail(graph: &mut DependencyGraph, id: &str) {
        let step = graph.get_mut(id).unwrap();
        step.mark_running().unwrap();
        step.mark_failed("boom").unwrap();
    }

    #[test]
    fn test_edges_recorded() {
        let g = graph(vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["a"])]);

        assert_eq!(g.dependents("a"), ["b", "c"]);
        assert_eq!(g.dependencies("b"), ["a"]);
        assert!(g.dependents("c").is_empty());
    }

    #[test]
    fn test_adjacency_created_for_forward_reference() {
        let mut g = DependencyGraph::new();
        g.add_step(Step::new("b", "echo").with_dependencies(["a"]));

        assert_eq!(g.dependents("a"), ["b"]);
        assert!(g.dependencies("a").is_empty());
        assert!(!g.contains("a"));
    }

    #[test]
    fn test_linear_levels() {
        let g = graph(vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["b"])]);

        assert!(g.validate().is_ok());
        let levels = g.topological_sort().unwrap();
        assert_eq!(levels, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_diamond_levels() {
        let g = graph(vec![
            spec("merge", &["branch1", "branch2"]),
            spec("branch2", &["root"]),
            spec("branch1", &["root"]),
            spec("root", &[]),
        ]);

        let levels = g.topological_sort().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["root"]);
        let middle: HashSet<_> = levels[1].iter().map(String::as_str).collect();
        assert_eq!(middle, HashSet::from(["branch1", "branch2"]));
        assert_eq!(levels[2], vec!["merge"]);
    }

    #[test]
    fn test_levels_respect_dependencies() {
        let g = graph(vec![
            spec("e", &["c", "d"]),
            spec("a", &[]),
            spec("d", &["a"]),
            spec("b", &[]),
            spec("c", &["a", "b"]),
            spec("f", &["b"]),
            spec("g", &["e", "f"]),
        ]);

        let levels = g.topological_sort().unwrap();
        let level_of: HashMap<&str, usize> = levels
            .iter()
            .enumerate()
            .flat_map(|(i, level)| level.iter().map(move |id| (id.as_str(), i)))
            .collect();

        // each step placed exactly once
        assert_eq!(level_of.len(), g.len());
        assert_eq!(levels.iter().map(Vec::len).sum::<usize>(), g.len());

        for step in g.steps() {
            for dep in &step.depends_on {
                assert!(level_of[step.id.as_str()] > level_of[dep.as_str()]);
            }
        }
    }

    #[test]
    fn test_root_steps() {
        let g = graph(vec![spec("a", &[]), spec("b", &["a"]), spec("c", &[])]);
        let roots: Vec<_> = g.root_steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(roots, vec!["a", "c"]);
    }

    #[test]
    fn test_ready_steps_follow_completion() {
        let mut g = graph(vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["b"])]);

        let ready: Vec<_> = g.ready_steps().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ready, vec!["a"]);

        finish(&mut g, "a");
        let ready: Vec<_> = g.ready_steps().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn test_ready_steps_idempotent() {
        let g = graph(vec![spec("a", &[]), spec("b", &[]), spec("c", &["a"])]);

        let first: Vec<_> = g.ready_steps().iter().map(|s| s.id.clone()).collect();
        let second: Vec<_> = g.ready_steps().iter().map(|s| s.id.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ready_steps_treat_missing_dependency_as_satisfied() {
        let g = graph(vec![spec("a", &["ghost"])]);
        assert_eq!(g.ready_steps().len(), 1);
    }

    #[test]
    fn test_missing_dependency() {
        let g = graph(vec![spec("a", &["ghost"])]);

        let err = g.validate().unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingDependency {
                step: "a".into(),
                dependency: "ghost".into()
            }
        );
        let message = err.to_string();
        assert!(message.contains("'a'"));
        assert!(message.contains("'ghost'"));
    }

    #[test]
    fn test_detect_cycle_path() {
        let g = graph(vec![
            spec("start", &[]),
            spec("a", &["start", "c"]),
            spec("b", &["a"]),
            spec("c", &["b"]),
        ]);

        let cycle = g.detect_cycle().unwrap();
        assert!(cycle.len() >= 2);
        assert_eq!(cycle.first(), cycle.last());
        let members: HashSet<_> = cycle.iter().map(String::as_str).collect();
        assert_eq!(members, HashSet::from(["a", "b", "c"]));

        let err = g.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_detect_cycle_is_deterministic() {
        let specs = || vec![spec("a", &["b"]), spec("b", &["a"])];
        let first = graph(specs()).detect_cycle();
        for _ in 0..10 {
            assert_eq!(graph(specs()).detect_cycle(), first);
        }
        assert_eq!(first.unwrap(), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_self_loop() {
        let g = graph(vec![spec("a", &["a"])]);

        assert_eq!(g.detect_cycle().unwrap(), vec!["a", "a"]);
        assert!(matches!(g.validate(), Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_acyclic_has_no_cycle() {
        let g = graph(vec![
            spec("a", &[]),
            spec("b", &["a"]),
            spec("c", &["a"]),
            spec("d", &["b", "c"]),
        ]);
        assert!(g.detect_cycle().is_none());
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_sort_rejects_cycle_without_validation() {
        let g = graph(vec![spec("a", &[]), spec("b", &["a", "c"]), spec("c", &["b"])]);

        let err = g.topological_sort().unwrap_err();
        assert_eq!(err, GraphError::SortIntegrity { placed: 1, total: 3 });
        assert!(!err.is_validation());
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = DependencyGraph::from_specs(vec![spec("a", &[]), spec("a", &[])], false)
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateStep("a".into()));
    }

    #[test]
    fn test_duplicate_overwrites_and_drops_stale_edges() {
        let g = DependencyGraph::from_specs(
            vec![spec("x", &[]), spec("y", &[]), spec("a", &["x"]), spec("a", &["y"])],
            true,
        )
        .unwrap();

        assert_eq!(g.len(), 3);
        assert!(g.dependents("x").is_empty());
        assert_eq!(g.dependents("y"), ["a"]);
        assert_eq!(g.dependencies("a"), ["y"]);
        // keeps its original position
        let ids: Vec<_> = g.steps().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "a"]);
    }

    #[test]
    fn test_propagate_skips_reaches_fixpoint() {
        let mut g = graph(vec![
            spec("a", &[]),
            spec("b", &["a"]),
            spec("c", &["b"]),
            spec("d", &["c"]),
            spec("side", &[]),
        ]);
        fail(&mut g, "a");

        let skipped = g.propagate_skips();
        assert_eq!(skipped, vec!["b", "c", "d"]);
        assert_eq!(g.get("b").unwrap().error(), Some("depends on failed step(s): a"));
        assert_eq!(g.get("c").unwrap().error(), Some("depends on skipped step(s): b"));
        assert_eq!(g.get("side").unwrap().status(), StepStatus::Pending);

        // nothing left to do
        assert!(g.propagate_skips().is_empty());
    }

    #[test]
    fn test_skip_reason_names_all_failed_dependencies() {
        let mut g = graph(vec![spec("a", &[]), spec("b", &[]), spec("c", &["a", "b"])]);
        fail(&mut g, "a");
        fail(&mut g, "b");

        g.propagate_skips();
        assert_eq!(
            g.get("c").unwrap().error(),
            Some("depends on failed step(s): a, b")
        );
    }

    #[test]
    fn test_cancel_pending() {
        let mut g = graph(vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["b"])]);
        finish(&mut g, "a");

        assert_eq!(g.cancel_pending(), 2);
        assert_eq!(g.count(StepStatus::Cancelled), 2);
        assert_eq!(g.count(StepStatus::Completed), 1);
    }

    #[test]
    fn test_view() {
        let g = graph(vec![spec("a", &[]), spec("b", &["a"])]);
        let view = g.view();

        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.nodes[0].id, "a");
        assert_eq!(view.nodes[0].label, "echo");
        assert_eq!(view.nodes[0].status, StepStatus::Pending);
        assert_eq!(view.edges.len(), 1);
        assert_eq!(view.edges[0].from, "a");
        assert_eq!(view.edges[0].to, "b");
    }
}
