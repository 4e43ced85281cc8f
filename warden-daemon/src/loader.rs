//! Service description loader
//!
//! `load` reads a description, drives the lexer and settings accumulator over every
//! line, then loads each dependency recursively. A whole transitive load is staged
//! in a [`LoadSession`] and only committed to the graph once everything in it has
//! loaded, so a failed load never leaves partial nodes behind.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::{
    DependencyType, Line, LogicalLine, PrelimDep, ServiceConfig, ServiceSettings, logical_lines,
    split_line,
};
use crate::env::EnvLookup;
use crate::errors::{DaemonError, Result};
use crate::graph::{ServiceGraph, ServiceId};
use crate::source::ServiceSource;

/// Marker used as the line text for errors found after the last line
const END_OF_DESCRIPTION: &str = "(end of description)";

pub struct ServiceLoader<S, E> {
    source: S,
    env: E,
}

impl<S: ServiceSource, E: EnvLookup> ServiceLoader<S, E> {
    pub fn new(source: S, env: E) -> Self {
        Self { source, env }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Load `name` and everything it depends on into `graph`.
    ///
    /// A service already in the graph is returned as is, without reading its
    /// description again.
    pub fn load(&self, graph: &mut ServiceGraph, name: &str) -> Result<ServiceId> {
        if let Some(id) = graph.lookup(name) {
            return Ok(id);
        }

        let mut session = LoadSession::new(self, graph);
        session.visit(name, None)?;
        let staged = session.into_staged();
        commit(graph, staged, name)
    }

    /// Parse one description into settings, without touching dependencies.
    pub fn parse_description(&self, name: &str, text: &str) -> Result<ServiceSettings> {
        let mut settings = ServiceSettings::new();
        for line in logical_lines(text) {
            self.process_line(&mut settings, name, &line)?;
        }
        Ok(settings)
    }

    /// Read and validate the description of a single service.
    ///
    /// Dependency directories are expanded into the returned dependencies, but the
    /// dependencies themselves are not read.
    pub fn read_service(&self, name: &str) -> Result<(ServiceConfig, Vec<PrelimDep>)> {
        let text = self
            .source
            .read_description(name)?
            .ok_or_else(|| DaemonError::ServiceNotFound(name.to_string()))?;
        let mut settings = self.parse_description(name, &text)?;

        for dir in std::mem::take(&mut settings.dep_dirs) {
            for entry in self.source.list_dependency_dir(name, &dir.dir)? {
                settings.depends.push(PrelimDep::new(entry, dir.dep_type));
            }
        }

        settings
            .finish()
            .map_err(|e| DaemonError::description(name, END_OF_DESCRIPTION, e.to_string()))
    }

    fn process_line(
        &self,
        settings: &mut ServiceSettings,
        name: &str,
        line: &LogicalLine,
    ) -> Result<()> {
        let wrap = |reason: String| DaemonError::description(name, line.text.trim(), reason);

        match split_line(&line.text).map_err(|e| wrap(e.to_string()))? {
            Line::Blank => {}
            Line::Meta(meta) => {
                warn!(
                    "Service '{}' line {}: ignoring meta-command '@{}'",
                    name, line.number, meta
                );
            }
            Line::Setting(directive) => {
                let values = directive
                    .values()
                    .collect_tokens(&self.env)
                    .map_err(|e| wrap(e.to_string()))?;
                settings
                    .apply(directive.setting, values)
                    .map_err(|e| wrap(e.to_string()))?;
            }
        }
        Ok(())
    }
}

/// A service parsed during the current session but not yet in the graph
#[derive(Debug)]
struct StagedService {
    name: String,
    config: ServiceConfig,
    deps: Vec<PrelimDep>,
}

/// State of one top-level `load` call
struct LoadSession<'a, S, E> {
    loader: &'a ServiceLoader<S, E>,
    graph: &'a ServiceGraph,
    staged: Vec<StagedService>,
    staged_names: HashMap<String, usize>,
    /// Services being loaded, outermost first, with the edge type they were reached by
    stack: Vec<(String, Option<DependencyType>)>,
}

impl<'a, S: ServiceSource, E: EnvLookup> LoadSession<'a, S, E> {
    fn new(loader: &'a ServiceLoader<S, E>, graph: &'a ServiceGraph) -> Self {
        Self {
            loader,
            graph,
            staged: Vec::new(),
            staged_names: HashMap::new(),
            stack: Vec::new(),
        }
    }

    fn visit(&mut self, name: &str, via: Option<DependencyType>) -> Result<()> {
        if self.graph.lookup(name).is_some() || self.staged_names.contains_key(name) {
            return Ok(());
        }

        if let Some(pos) = self.stack.iter().position(|(n, _)| n == name) {
            let all_regular = via == Some(DependencyType::Regular)
                && self.stack[pos + 1..]
                    .iter()
                    .all(|(_, t)| *t == Some(DependencyType::Regular));
            if all_regular {
                let mut cycle: Vec<String> =
                    self.stack[pos..].iter().map(|(n, _)| n.clone()).collect();
                cycle.push(name.to_string());
                return Err(DaemonError::DependencyCycle(cycle));
            }
            // Soft edge back into the load: recorded at commit, no recursion
            return Ok(());
        }

        let (config, deps) = self.loader.read_service(name)?;

        self.stack.push((name.to_string(), via));
        for dep in &deps {
            self.visit(&dep.name, Some(dep.dep_type))?;
        }
        self.stack.pop();

        debug!("Staged service '{}' with {} dependencies", name, deps.len());
        self.staged_names.insert(name.to_string(), self.staged.len());
        self.staged.push(StagedService {
            name: name.to_string(),
            config,
            deps,
        });
        Ok(())
    }

    fn into_staged(self) -> Vec<StagedService> {
        self.staged
    }
}

/// Insert staged services and their edges, rolling back on any error.
fn commit(graph: &mut ServiceGraph, staged: Vec<StagedService>, root: &str) -> Result<ServiceId> {
    let base = graph.len();
    match insert_staged(graph, staged, root) {
        Ok(id) => Ok(id),
        Err(e) => {
            graph.truncate(base);
            Err(e)
        }
    }
}

fn insert_staged(
    graph: &mut ServiceGraph,
    staged: Vec<StagedService>,
    root: &str,
) -> Result<ServiceId> {
    let mut pending = Vec::with_capacity(staged.len());
    for service in staged {
        let id = graph.insert(service.name, service.config)?;
        pending.push((id, service.deps));
    }

    for (id, deps) in pending {
        for dep in deps {
            let dep_id = graph.lookup(&dep.name).ok_or_else(|| {
                DaemonError::Internal(format!("dependency '{}' was not staged", dep.name))
            })?;
            if dep.reversed {
                graph.add_edge(dep_id, id, dep.dep_type);
            } else {
                graph.add_edge(id, dep_id, dep.dep_type);
            }
        }
    }

    if let Some(cycle) = graph.find_regular_cycle() {
        return Err(DaemonError::DependencyCycle(cycle));
    }

    graph
        .lookup(root)
        .ok_or_else(|| DaemonError::Internal(format!("service '{}' was not staged", root)))
}
