//! Field-dependency graph over mapping outputs.
//!
//! A mapping entry whose source head names *another* declared output reads
//! that output's mapped value instead of the input record, which makes it
//! depend on that entry. The graph must be acyclic; transformations are
//! applied in topological order.

use std::collections::BTreeMap;

use crate::error::CompileError;
use crate::spec::MappingField;

/// Validated, topologically ordered dependency structure.
#[derive(Debug, Clone)]
pub struct FieldGraph {
    /// Mapping indices in application order (dependencies first).
    pub order: Vec<usize>,
    /// For each mapping entry: the entry it reads from, if any.
    pub depends_on: Vec<Option<usize>>,
    /// output -> outputs it depends on, for introspection and compat diffs.
    pub edges: BTreeMap<String, Vec<String>>,
}

pub fn build_field_graph(mapping: &[MappingField]) -> Result<FieldGraph, CompileError> {
    // 1) Index outputs and derive edges.
    let mut by_output: BTreeMap<&str, usize> = BTreeMap::new();
    for (idx, field) in mapping.iter().enumerate() {
        by_output.insert(field.output.as_str(), idx);
    }

    let mut depends_on: Vec<Option<usize>> = vec![None; mapping.len()];
    let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (idx, field) in mapping.iter().enumerate() {
        let head = field.source.head();
        // Source naming the entry's own output reads the input record, not
        // itself; only a *different* declared output forms an edge.
        if head != field.output {
            if let Some(&dep) = by_output.get(head) {
                depends_on[idx] = Some(dep);
                edges
                    .entry(field.output.clone())
                    .or_default()
                    .push(mapping[dep].output.clone());
            }
        }
    }

    // 2) Topological order via DFS coloring (cycle => CircularDependency).
    #[derive(Copy, Clone, PartialEq, Eq)]
    enum Mark {
        Temp,
        Perm,
    }

    fn dfs(
        idx: usize,
        mapping: &[MappingField],
        depends_on: &[Option<usize>],
        marks: &mut Vec<Option<Mark>>,
        stack: &mut Vec<String>,
        order: &mut Vec<usize>,
    ) -> Result<(), CompileError> {
        match marks[idx] {
            Some(Mark::Perm) => return Ok(()),
            Some(Mark::Temp) => {
                stack.push(mapping[idx].output.clone());
                return Err(CompileError::CircularDependency {
                    cycle: stack.join(" -> "),
                });
            }
            None => {}
        }

        marks[idx] = Some(Mark::Temp);
        stack.push(mapping[idx].output.clone());

        if let Some(dep) = depends_on[idx] {
            dfs(dep, mapping, depends_on, marks, stack, order)?;
        }

        stack.pop();
        marks[idx] = Some(Mark::Perm);
        order.push(idx);
        Ok(())
    }

    let mut marks: Vec<Option<Mark>> = vec![None; mapping.len()];
    let mut order: Vec<usize> = Vec::with_capacity(mapping.len());
    let mut stack: Vec<String> = Vec::new();
    for idx in 0..mapping.len() {
        stack.clear();
        dfs(idx, mapping, &depends_on, &mut marks, &mut stack, &mut order)?;
    }

    Ok(FieldGraph {
        order,
        depends_on,
        edges,
    })
}
