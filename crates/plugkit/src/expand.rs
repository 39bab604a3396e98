//! Dependency expansion.
//!
//! Flattens nested `depends` into a list where every dependency precedes its
//! dependents and each name appears once. Expansion runs in two passes: the
//! first walks the spec tree and merges repeated occurrences by name, the
//! second orders the merged graph depth-first. A name already on the current
//! path is treated as resolved, so cyclic graphs terminate.

use std::collections::{HashMap, HashSet};

use crate::spec::Spec;

#[derive(Default)]
struct Graph {
    specs: HashMap<String, Spec>,
    edges: HashMap<String, Vec<String>>,
}

impl Graph {
    fn collect(&mut self, spec: &Spec) {
        match self.specs.get_mut(&spec.name) {
            Some(existing) => existing.merge(spec),
            None => {
                self.specs.insert(spec.name.clone(), spec.clone());
            }
        }

        let edges = self.edges.entry(spec.name.clone()).or_default();
        for dep in &spec.depends {
            if !edges.contains(&dep.name) {
                edges.push(dep.name.clone());
            }
        }

        for dep in &spec.depends {
            self.collect(dep);
        }
    }

    fn order(&self, roots: &[String]) -> Vec<String> {
        let mut done = HashSet::new();
        let mut on_path = HashSet::new();
        let mut out = Vec::with_capacity(self.specs.len());

        for root in roots {
            self.visit(root, &mut done, &mut on_path, &mut out);
        }
        out
    }

    fn visit(
        &self,
        name: &str,
        done: &mut HashSet<String>,
        on_path: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) {
        if done.contains(name) {
            return;
        }
        if !on_path.insert(name.to_string()) {
            log::debug!("Dependency cycle through {name}, treating as resolved");
            return;
        }

        if let Some(deps) = self.edges.get(name) {
            for dep in deps {
                self.visit(dep, done, on_path, out);
            }
        }

        on_path.remove(name);
        done.insert(name.to_string());
        out.push(name.to_string());
    }

    fn into_specs(mut self, order: Vec<String>) -> Vec<Spec> {
        order
            .into_iter()
            .filter_map(|name| self.specs.remove(&name))
            .collect()
    }
}

/// Expand one top-level spec into a dependency-first list.
pub fn expand(root: &Spec) -> Vec<Spec> {
    expand_all(std::slice::from_ref(root))
}

/// Expand several top-level specs; names shared between roots appear once.
pub fn expand_all(roots: &[Spec]) -> Vec<Spec> {
    let mut graph = Graph::default();
    for root in roots {
        graph.collect(root);
    }

    let root_names: Vec<String> = roots.iter().map(|r| r.name.clone()).collect();
    let order = graph.order(&root_names);
    graph.into_specs(order)
}
