//! Dependency graph of loaded services
//!
//! The graph owns every [`Service`] node. Everything else refers to services by
//! [`ServiceId`], an index that stays valid for the life of the graph.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::fmt::Write as _;

use crate::config::{DependencyType, ServiceConfig, ServiceType};
use crate::errors::{DaemonError, Result};
use crate::state::{ServiceInfo, ServiceState};

/// Index of a service within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(usize);

impl ServiceId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A loaded service: immutable settings plus runtime state
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub config: ServiceConfig,
    pub state: ServiceState,
}

impl Service {
    pub fn service_type(&self) -> ServiceType {
        self.config.service_type
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            service_type: self.config.service_type,
            status: self.state.status,
            pid: self.state.pid(),
            started_at: self.state.process.map(|p| p.started_at),
            last_exit: self.state.last_exit,
            failure: self.state.failure.clone(),
            restart_count: self.state.restart_count,
            explicit: self.state.explicit,
            required_by: self.state.required_by,
        }
    }
}

/// A typed edge from a dependent to one of its dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub dependent: ServiceId,
    pub dependency: ServiceId,
    pub dep_type: DependencyType,
}

/// Which edge types a neighbour query follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepFilter {
    Any,
    Only(DependencyType),
    /// Regular and milestone edges
    Hard,
    /// Edges that hold their dependency up (everything but ordering)
    Activating,
}

impl DepFilter {
    pub fn matches(&self, dep_type: DependencyType) -> bool {
        match self {
            DepFilter::Any => true,
            DepFilter::Only(t) => *t == dep_type,
            DepFilter::Hard => dep_type.requires_success(),
            DepFilter::Activating => dep_type.activates(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ServiceGraph {
    services: Vec<Service>,
    by_name: HashMap<String, ServiceId>,
    /// Outgoing edges per service, in declaration order
    dependencies: Vec<Vec<Edge>>,
    /// Incoming edges per service, in insertion order
    dependents: Vec<Vec<Edge>>,
}

impl ServiceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ServiceId> + '_ {
        (0..self.services.len()).map(ServiceId)
    }

    pub fn lookup(&self, name: &str) -> Option<ServiceId> {
        self.by_name.get(name).copied()
    }

    pub fn service(&self, id: ServiceId) -> &Service {
        &self.services[id.0]
    }

    pub fn service_mut(&mut self, id: ServiceId) -> &mut Service {
        &mut self.services[id.0]
    }

    pub fn name(&self, id: ServiceId) -> &str {
        &self.services[id.0].name
    }

    pub fn state(&self, id: ServiceId) -> &ServiceState {
        &self.services[id.0].state
    }

    pub fn state_mut(&mut self, id: ServiceId) -> &mut ServiceState {
        &mut self.services[id.0].state
    }

    /// Insert a new service node. Names are unique.
    pub fn insert(&mut self, name: impl Into<String>, config: ServiceConfig) -> Result<ServiceId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(DaemonError::Internal(format!(
                "service '{}' is already in the graph",
                name
            )));
        }
        let id = ServiceId(self.services.len());
        self.services.push(Service {
            name: name.clone(),
            config,
            state: ServiceState::default(),
        });
        self.dependencies.push(Vec::new());
        self.dependents.push(Vec::new());
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Add an edge. Returns false if the same (dependent, dependency, type) edge exists.
    pub fn add_edge(
        &mut self,
        dependent: ServiceId,
        dependency: ServiceId,
        dep_type: DependencyType,
    ) -> bool {
        let edge = Edge {
            dependent,
            dependency,
            dep_type,
        };
        if self.dependencies[dependent.0].contains(&edge) {
            return false;
        }
        self.dependencies[dependent.0].push(edge);
        self.dependents[dependency.0].push(edge);
        true
    }

    /// Remove every service with an index of `len` or more, and their edges.
    ///
    /// Used to discard a partially committed load; services below `len` never
    /// have edges to services above it.
    pub(crate) fn truncate(&mut self, len: usize) {
        for service in self.services.drain(len..) {
            self.by_name.remove(&service.name);
        }
        self.dependencies.truncate(len);
        self.dependents.truncate(len);
        for incoming in &mut self.dependents {
            incoming.retain(|edge| edge.dependent.0 < len);
        }
    }

    pub fn dependency_edges(&self, id: ServiceId) -> &[Edge] {
        &self.dependencies[id.0]
    }

    pub fn dependent_edges(&self, id: ServiceId) -> &[Edge] {
        &self.dependents[id.0]
    }

    /// Dependencies of `id` whose edge type passes `filter`, in declaration order
    pub fn dependencies_of(&self, id: ServiceId, filter: DepFilter) -> Vec<ServiceId> {
        self.dependencies[id.0]
            .iter()
            .filter(|e| filter.matches(e.dep_type))
            .map(|e| e.dependency)
            .collect()
    }

    /// Dependents of `id` whose edge type passes `filter`, in insertion order
    pub fn dependents_of(&self, id: ServiceId, filter: DepFilter) -> Vec<ServiceId> {
        self.dependents[id.0]
            .iter()
            .filter(|e| filter.matches(e.dep_type))
            .map(|e| e.dependent)
            .collect()
    }

    /// `root` and everything it transitively depends on (all edge types), breadth-first
    pub fn dependency_closure(&self, roots: &[ServiceId]) -> Vec<ServiceId> {
        let mut seen: HashSet<ServiceId> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<ServiceId> = VecDeque::new();
        for &root in roots {
            if seen.insert(root) {
                queue.push_back(root);
            }
        }
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for edge in &self.dependencies[id.0] {
                if seen.insert(edge.dependency) {
                    queue.push_back(edge.dependency);
                }
            }
        }
        order
    }

    /// Start order for `root` and its transitive dependencies.
    ///
    /// Every regular dependency precedes its dependent. Other edges only influence
    /// the order where they do not conflict with a regular edge; ties follow
    /// declaration order.
    pub fn topological_start_order(&self, root: ServiceId) -> Result<Vec<ServiceId>> {
        self.ordered(&[root])
    }

    /// Start order for every service in the graph
    pub fn start_order(&self) -> Result<Vec<ServiceId>> {
        let all: Vec<ServiceId> = self.ids().collect();
        self.ordered(&all)
    }

    /// Stop order for `root` and its dependencies (reverse of start order)
    pub fn stop_order(&self, root: ServiceId) -> Result<Vec<ServiceId>> {
        let mut order = self.topological_start_order(root)?;
        order.reverse();
        Ok(order)
    }

    /// Preferred order: DFS post-order over all edges, skipping edges that close a
    /// cycle. Then Kahn's algorithm over regular edges, picking the ready service
    /// with the best preferred rank each time.
    fn ordered(&self, seeds: &[ServiceId]) -> Result<Vec<ServiceId>> {
        let mut rank: HashMap<ServiceId, usize> = HashMap::new();
        let mut on_path: HashSet<ServiceId> = HashSet::new();
        for &seed in seeds {
            self.post_order(seed, &mut rank, &mut on_path);
        }

        // Remaining regular dependencies within the set
        let mut in_degree: HashMap<ServiceId, usize> = rank
            .keys()
            .map(|&id| {
                let count = self.dependencies[id.0]
                    .iter()
                    .filter(|e| e.dep_type == DependencyType::Regular)
                    .map(|e| e.dependency)
                    .collect::<HashSet<_>>()
                    .len();
                (id, count)
            })
            .collect();

        let mut ready: BTreeSet<(usize, ServiceId)> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| (rank[&id], id))
            .collect();

        let mut order = Vec::with_capacity(rank.len());
        while let Some((_, id)) = ready.pop_first() {
            order.push(id);
            let dependents: HashSet<ServiceId> = self.dependents[id.0]
                .iter()
                .filter(|e| e.dep_type == DependencyType::Regular)
                .map(|e| e.dependent)
                .collect();
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert((rank[&dependent], dependent));
                    }
                }
            }
        }

        if order.len() != rank.len() {
            let names = self.find_regular_cycle().unwrap_or_else(|| {
                rank.keys()
                    .filter(|id| !order.contains(id))
                    .map(|&id| self.name(id).to_string())
                    .collect()
            });
            return Err(DaemonError::DependencyCycle(names));
        }

        Ok(order)
    }

    fn post_order(
        &self,
        id: ServiceId,
        rank: &mut HashMap<ServiceId, usize>,
        on_path: &mut HashSet<ServiceId>,
    ) {
        if rank.contains_key(&id) || !on_path.insert(id) {
            return;
        }
        for edge in &self.dependencies[id.0] {
            self.post_order(edge.dependency, rank, on_path);
        }
        on_path.remove(&id);
        let next = rank.len();
        rank.insert(id, next);
    }

    /// Find a cycle made only of regular edges.
    ///
    /// Returns the names along the cycle with the first name repeated at the end,
    /// e.g. `["a", "b", "a"]`.
    pub fn find_regular_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnPath,
            Done,
        }

        fn visit(
            graph: &ServiceGraph,
            id: ServiceId,
            marks: &mut [Mark],
            path: &mut Vec<ServiceId>,
        ) -> Option<Vec<String>> {
            marks[id.0] = Mark::OnPath;
            path.push(id);
            for edge in &graph.dependencies[id.0] {
                if edge.dep_type != DependencyType::Regular {
                    continue;
                }
                match marks[edge.dependency.0] {
                    Mark::OnPath => {
                        let start = path.iter().position(|&p| p == edge.dependency)?;
                        let mut names: Vec<String> = path[start..]
                            .iter()
                            .map(|&p| graph.name(p).to_string())
                            .collect();
                        names.push(graph.name(edge.dependency).to_string());
                        return Some(names);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(graph, edge.dependency, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            path.pop();
            marks[id.0] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.services.len()];
        let mut path = Vec::new();
        for id in self.ids() {
            if marks[id.0] == Mark::New
                && let Some(cycle) = visit(self, id, &mut marks, &mut path)
            {
                return Some(cycle);
            }
        }
        None
    }

    /// Graphviz export. With `roots`, only the roots and what they depend on
    /// (transitively) are included.
    pub fn to_dot(&self, roots: &[ServiceId]) -> String {
        let included: Vec<ServiceId> = if roots.is_empty() {
            self.ids().collect()
        } else {
            self.dependency_closure(roots)
        };
        let included_set: HashSet<ServiceId> = included.iter().copied().collect();

        let mut nodes: Vec<ServiceId> = included.clone();
        nodes.sort_by(|a, b| self.name(*a).cmp(self.name(*b)));

        let mut out = String::new();
        out.push_str("digraph WardenServices {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n");
        for id in nodes {
            let name = dot_escape(self.name(id));
            let color = dot_color(self.service(id).service_type());
            let _ = writeln!(
                out,
                "    \"{name}\" [label=\"{name}\", fillcolor=\"{color}\", style=\"rounded,filled\"];"
            );
        }
        for &id in &included {
            for edge in &self.dependencies[id.0] {
                if !included_set.contains(&edge.dependency) {
                    continue;
                }
                let _ = writeln!(
                    out,
                    "    \"{}\" -> \"{}\" [arrowhead=\"{}\"];",
                    dot_escape(self.name(edge.dependent)),
                    dot_escape(self.name(edge.dependency)),
                    dot_arrowhead(edge.dep_type)
                );
            }
        }
        out.push_str("}\n");
        out
    }
}

fn dot_escape(name: &str) -> String {
    name.replace('"', "\\\"")
}

fn dot_color(service_type: ServiceType) -> &'static str {
    match service_type {
        ServiceType::Process => "lightblue",
        ServiceType::BgProcess => "lightgreen",
        ServiceType::Scripted => "lightyellow",
        ServiceType::Internal => "lightgray",
        ServiceType::Triggered => "lightpink",
    }
}

fn dot_arrowhead(dep_type: DependencyType) -> &'static str {
    match dep_type {
        DependencyType::Regular => "normal",
        DependencyType::WaitsFor => "diamond",
        DependencyType::Milestone => "dot",
        DependencyType::After => "tee",
    }
}
