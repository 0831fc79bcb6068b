//! Operator dependency graph: referential validation, cycle detection,
//! and deterministic scheduling.
//!
//! Pure computation: identical specs always produce identical schedules,
//! so plan output and audit artifacts are reproducible.

use std::collections::HashMap;

use prodline_types::errors::PipelineError;
use prodline_types::pipeline::PipelineSpec;

/// One node's slice of the schedule: members in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNode {
    pub node_id: String,
    pub operators: Vec<String>,
}

/// The full deterministic execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub nodes: Vec<ScheduledNode>,
}

impl Schedule {
    /// Flat operator order across all nodes.
    pub fn operator_order(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .flat_map(|n| n.operators.iter().map(String::as_str))
    }
}

/// Directed graph over operators: an edge `u -> v` exists when `v`
/// declares `u` upstream.
pub struct DependencyGraph<'a> {
    spec: &'a PipelineSpec,
    /// Operator ids in declaration order.
    ids: Vec<&'a str>,
    index: HashMap<&'a str, usize>,
    /// `children[u]` lists dependents of `u`, in discovery order.
    children: Vec<Vec<usize>>,
    /// `parents[v]` lists upstreams of `v`, in declared order.
    parents: Vec<Vec<usize>>,
}

impl<'a> DependencyGraph<'a> {
    /// Build the graph, verifying every declared upstream resolves.
    ///
    /// # Errors
    ///
    /// `MissingDependency` naming the operator and the dangling upstream.
    pub fn build(spec: &'a PipelineSpec) -> Result<Self, PipelineError> {
        let ids: Vec<&str> = spec.operators.iter().map(|o| o.operator_id.as_str()).collect();
        let index: HashMap<&str, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut children = vec![Vec::new(); ids.len()];
        let mut parents = vec![Vec::new(); ids.len()];
        for (v, op) in spec.operators.iter().enumerate() {
            for upstream in &op.upstream {
                let Some(&u) = index.get(upstream.as_str()) else {
                    return Err(PipelineError::MissingDependency(format!(
                        "operator '{}' depends on unknown operator '{upstream}'",
                        op.operator_id
                    )));
                };
                children[u].push(v);
                parents[v].push(u);
            }
        }

        Ok(Self {
            spec,
            ids,
            index,
            children,
            parents,
        })
    }

    /// Validate acyclicity and cross-node ordering, then produce the
    /// deterministic schedule: nodes in declaration order, members in
    /// declaration order refined by intra-node dependency edges.
    ///
    /// # Errors
    ///
    /// `CyclicDependency` naming the cycle, or `Config` when a
    /// dependency crosses node boundaries against the declared node
    /// order.
    pub fn schedule(&self) -> Result<Schedule, PipelineError> {
        self.check_acyclic()?;
        self.check_cross_node_order()?;

        let nodes = self
            .spec
            .nodes
            .iter()
            .map(|node| ScheduledNode {
                node_id: node.node_id.clone(),
                operators: self.order_members(&node.operators),
            })
            .collect();
        Ok(Schedule { nodes })
    }

    fn check_acyclic(&self) -> Result<(), PipelineError> {
        let mut indegree: Vec<usize> = self.parents.iter().map(Vec::len).collect();
        let mut ready: Vec<usize> = (0..self.ids.len()).filter(|&i| indegree[i] == 0).collect();
        let mut processed = 0usize;

        while let Some(u) = ready.pop() {
            processed += 1;
            for &v in &self.children[u] {
                indegree[v] -= 1;
                if indegree[v] == 0 {
                    ready.push(v);
                }
            }
        }

        if processed == self.ids.len() {
            return Ok(());
        }

        // Remaining vertices all sit on or feed a cycle; walk parents
        // until one repeats to name the cycle itself.
        let start = (0..self.ids.len())
            .find(|&i| indegree[i] > 0)
            .expect("cycle exists");
        let mut seen_at: HashMap<usize, usize> = HashMap::new();
        let mut path = Vec::new();
        let mut current = start;
        loop {
            if let Some(&pos) = seen_at.get(&current) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|&i| self.ids[i].to_string()).collect();
                // Parent-walking discovers the cycle against edge
                // direction; reverse so it reads upstream -> dependent.
                cycle.reverse();
                cycle.push(cycle[0].clone());
                return Err(PipelineError::CyclicDependency { cycle });
            }
            seen_at.insert(current, path.len());
            path.push(current);
            current = *self.parents[current]
                .iter()
                .find(|&&p| indegree[p] > 0)
                .expect("unprocessed vertex has an unprocessed parent");
        }
    }

    fn check_cross_node_order(&self) -> Result<(), PipelineError> {
        let owner: HashMap<&str, (usize, &str)> = self
            .spec
            .nodes
            .iter()
            .enumerate()
            .flat_map(|(i, node)| {
                node.operators
                    .iter()
                    .map(move |id| (id.as_str(), (i, node.node_id.as_str())))
            })
            .collect();

        for (v, op) in self.spec.operators.iter().enumerate() {
            let Some(&(v_node_idx, v_node)) = owner.get(op.operator_id.as_str()) else {
                continue;
            };
            for &u in &self.parents[v] {
                let upstream_id = self.ids[u];
                let Some(&(u_node_idx, u_node)) = owner.get(upstream_id) else {
                    continue;
                };
                if u_node_idx > v_node_idx {
                    return Err(PipelineError::config(
                        format!("nodes[{v_node_idx}]"),
                        format!(
                            "operator '{}' in node '{v_node}' depends on '{upstream_id}' \
                             in node '{u_node}', but '{u_node}' is declared after '{v_node}'",
                            op.operator_id
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Order one node's members: Kahn's algorithm restricted to
    /// intra-node edges, ties broken by declaration position.
    fn order_members(&self, members: &[String]) -> Vec<String> {
        let member_idx: HashMap<usize, usize> = members
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| self.index.get(id.as_str()).map(|&g| (g, pos)))
            .collect();

        let mut indegree: HashMap<usize, usize> = HashMap::new();
        for (&g, _) in &member_idx {
            let local_parents = self.parents[g]
                .iter()
                .filter(|&&p| member_idx.contains_key(&p))
                .count();
            indegree.insert(g, local_parents);
        }

        let mut ordered = Vec::with_capacity(members.len());
        let mut remaining: Vec<usize> = member_idx.keys().copied().collect();
        while !remaining.is_empty() {
            // Smallest declaration position among ready members.
            let next = remaining
                .iter()
                .copied()
                .filter(|g| indegree[g] == 0)
                .min_by_key(|g| member_idx[g])
                .expect("acyclic graph always has a ready member");
            remaining.retain(|&g| g != next);
            ordered.push(self.ids[next].to_string());
            for &child in &self.children[next] {
                if let Some(d) = indegree.get_mut(&child) {
                    *d -= 1;
                }
            }
        }
        ordered
    }
}
