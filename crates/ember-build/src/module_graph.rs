//! Module graph discovery and build order
//!
//! Starting from the entry file, relative imports are resolved against the
//! snapshot and followed until the import closure is complete. The graph is
//! then ordered dependencies-first with Kahn's algorithm.

use crate::compiler::{strip_type_only, TransformMode};
use crate::error::{BuildError, Result};
use crate::fs::normalize_path;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::OnceLock;
use tracing::debug;

/// Extensions tried, in order, when an import omits one
pub const RESOLVE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "json", "css"];

/// A module in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNode {
    /// Project path of the module
    pub id: String,
    /// Relative import specifier -> resolved project path (modules and assets)
    pub resolved: BTreeMap<String, String>,
    /// Resolved paths of imported modules
    pub dependencies: Vec<String>,
}

impl ModuleNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resolved: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Graph of modules reachable from an entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleGraph {
    modules: BTreeMap<String, ModuleNode>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover the import closure of `entry` within `files`
    pub fn resolve(entry: &str, files: &BTreeMap<String, String>) -> Result<Self> {
        let entry = normalize_path(entry);
        if !files.contains_key(&entry) {
            return Err(BuildError::EntryNotFound { entry });
        }
        if TransformMode::from_path(&entry).is_none() {
            return Err(BuildError::UnsupportedFile { path: entry });
        }

        let mut graph = Self::new();
        let mut queue = VecDeque::from([entry]);

        while let Some(id) = queue.pop_front() {
            if graph.modules.contains_key(&id) {
                continue;
            }

            let mut node = ModuleNode::new(id.clone());
            let is_script = TransformMode::from_path(&id).is_some_and(|m| m.is_script());
            let source = files.get(&id).map(String::as_str).unwrap_or_default();

            if is_script {
                for specifier in scan_imports(&strip_type_only(source)) {
                    if !is_relative(&specifier) {
                        continue;
                    }
                    let Some(target) = resolve_specifier(&id, &specifier, files) else {
                        return Err(BuildError::module_not_found(format!(
                            "{} (imported by {})",
                            specifier, id
                        )));
                    };
                    if TransformMode::from_path(&target).is_some()
                        && !node.dependencies.contains(&target)
                    {
                        node.dependencies.push(target.clone());
                        queue.push_back(target.clone());
                    }
                    node.resolved.insert(specifier, target);
                }
            }

            graph.add_module(node);
        }

        graph.validate()?;
        debug!(modules = graph.len(), "resolved module graph");
        Ok(graph)
    }

    pub fn add_module(&mut self, module: ModuleNode) {
        self.modules.insert(module.id.clone(), module);
    }

    pub fn get_module(&self, id: &str) -> Option<&ModuleNode> {
        self.modules.get(id)
    }

    pub fn modules(&self) -> &BTreeMap<String, ModuleNode> {
        &self.modules
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Check every dependency is itself in the graph
    pub fn validate(&self) -> Result<()> {
        for (id, module) in &self.modules {
            for dep in &module.dependencies {
                if !self.modules.contains_key(dep) {
                    return Err(BuildError::module_not_found(format!(
                        "{} (required by {})",
                        dep, id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Dependencies-first order (Kahn's algorithm)
    pub fn compute_build_order(&self) -> Result<Vec<String>> {
        if self.modules.is_empty() {
            return Ok(Vec::new());
        }

        // In-degree here is the number of unbuilt dependencies
        let mut in_degree: HashMap<&str, usize> = self
            .modules
            .iter()
            .map(|(id, module)| (id.as_str(), module.dependencies.len()))
            .collect();

        let mut queue: VecDeque<&str> = self
            .modules
            .iter()
            .filter(|(_, module)| module.dependencies.is_empty())
            .map(|(id, _)| id.as_str())
            .collect();
        let mut order = Vec::with_capacity(self.modules.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());

            for (dependent, module) in &self.modules {
                if module.dependencies.iter().any(|d| d == id) {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        if order.len() != self.modules.len() {
            return Err(BuildError::CircularDependency(self.find_cycle()));
        }

        Ok(order)
    }

    fn find_cycle(&self) -> String {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();

        for id in self.modules.keys() {
            if let Some(cycle) = self.dfs_find_cycle(id, &mut visited, &mut on_stack, &mut path) {
                return cycle;
            }
        }

        "unknown cycle".to_string()
    }

    fn dfs_find_cycle<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<String> {
        if on_stack.contains(id) {
            let start = path.iter().position(|m| *m == id).unwrap_or(0);
            let mut cycle: Vec<&str> = path[start..].to_vec();
            cycle.push(id);
            return Some(cycle.join(" -> "));
        }
        if !visited.insert(id) {
            return None;
        }

        on_stack.insert(id);
        path.push(id);

        if let Some(module) = self.modules.get(id) {
            for dep in &module.dependencies {
                if let Some(cycle) = self.dfs_find_cycle(dep, visited, on_stack, path) {
                    return Some(cycle);
                }
            }
        }

        on_stack.remove(id);
        path.pop();
        None
    }
}

fn from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^[ \t]*(?:import|export)\b[^;'"]*?\bfrom\s*["']([^"']+)["']"#)
            .expect("valid regex")
    })
}

fn bare_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^[ \t]*import\s*["']([^"']+)["']"#).expect("valid regex"))
}

fn require_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\brequire\(\s*["']([^"']+)["']\s*\)"#).expect("valid regex")
    })
}

/// Import specifiers in source order, without duplicates
pub fn scan_imports(source: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = [from_re(), bare_import_re(), require_re()]
        .iter()
        .flat_map(|re| re.captures_iter(source))
        .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.as_str().to_string())))
        .collect();
    found.sort_by_key(|(position, _)| *position);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|(_, specifier)| seen.insert(specifier.clone()))
        .map(|(_, specifier)| specifier)
        .collect()
}

pub fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// Resolve a relative specifier against the importer's directory
///
/// Tries the exact path, then each of [`RESOLVE_EXTENSIONS`], then
/// `index.*` inside a directory of that name.
pub fn resolve_specifier(
    importer: &str,
    specifier: &str,
    files: &BTreeMap<String, String>,
) -> Option<String> {
    let mut segments: Vec<&str> = importer.split('/').collect();
    segments.pop();

    for part in specifier.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            name => segments.push(name),
        }
    }
    let base = segments.join("/");
    if base.is_empty() {
        return None;
    }

    std::iter::once(base.clone())
        .chain(RESOLVE_EXTENSIONS.iter().map(|ext| format!("{}.{}", base, ext)))
        .chain(RESOLVE_EXTENSIONS.iter().map(|ext| format!("{}/index.{}", base, ext)))
        .find(|candidate| files.contains_key(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_graph() {
        let graph = ModuleGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.compute_build_order().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_linear_dependency_chain() {
        let mut graph = ModuleGraph::new();
        graph.add_module(ModuleNode::new("a").with_dependencies(vec!["b".into()]));
        graph.add_module(ModuleNode::new("b").with_dependencies(vec!["c".into()]));
        graph.add_module(ModuleNode::new("c"));

        assert_eq!(graph.compute_build_order().unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_diamond_dependency() {
        let mut graph = ModuleGraph::new();
        graph.add_module(ModuleNode::new("a").with_dependencies(vec!["b".into(), "c".into()]));
        graph.add_module(ModuleNode::new("b").with_dependencies(vec!["d".into()]));
        graph.add_module(ModuleNode::new("c").with_dependencies(vec!["d".into()]));
        graph.add_module(ModuleNode::new("d"));

        let order = graph.compute_build_order().unwrap();
        assert_eq!(order, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn test_circular_dependency_names_cycle() {
        let mut graph = ModuleGraph::new();
        graph.add_module(ModuleNode::new("a").with_dependencies(vec!["b".into()]));
        graph.add_module(ModuleNode::new("b").with_dependencies(vec!["a".into()]));

        match graph.compute_build_order() {
            Err(BuildError::CircularDependency(cycle)) => assert_eq!(cycle, "a -> b -> a"),
            other => panic!("expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_dependency() {
        let mut graph = ModuleGraph::new();
        graph.add_module(ModuleNode::new("a").with_dependencies(vec!["nonexistent".into()]));

        match graph.validate() {
            Err(BuildError::ModuleNotFound { module }) => assert!(module.contains("nonexistent")),
            other => panic!("expected ModuleNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_imports_in_source_order() {
        let source = r#"
import { a } from "./a";
import "./side";
export * from "./re";
const lazy = require('./lazy');
import React from "react";
import { again } from "./a";
"#;
        assert_eq!(
            scan_imports(source),
            vec!["./a", "./side", "./re", "./lazy", "react"]
        );
    }

    #[test]
    fn test_resolve_specifier_candidates() {
        let files = files(&[
            ("src/main.ts", ""),
            ("src/util.ts", ""),
            ("src/ui/index.tsx", ""),
            ("shared/data.json", ""),
        ]);

        assert_eq!(
            resolve_specifier("src/main.ts", "./util", &files).as_deref(),
            Some("src/util.ts")
        );
        assert_eq!(
            resolve_specifier("src/main.ts", "./ui", &files).as_deref(),
            Some("src/ui/index.tsx")
        );
        assert_eq!(
            resolve_specifier("src/main.ts", "../shared/data.json", &files).as_deref(),
            Some("shared/data.json")
        );
        assert_eq!(resolve_specifier("src/main.ts", "../../up", &files), None);
        assert_eq!(resolve_specifier("src/main.ts", "./nope", &files), None);
    }

    #[test]
    fn test_resolve_graph_from_entry() {
        let files = files(&[
            ("src/main.ts", "import type { T } from './types';\nimport { add } from './math';\nimport logo from '../art/logo.png';\n"),
            ("src/math.ts", "export const add = (a, b) => a + b;\n"),
            ("art/logo.png", "binary"),
            ("src/unused.ts", "import './missing';\n"),
        ]);

        let graph = ModuleGraph::resolve("./src/main.ts", &files).unwrap();
        assert_eq!(graph.len(), 2);
        let main = graph.get_module("src/main.ts").unwrap();
        assert_eq!(main.dependencies, vec!["src/math.ts"]);
        assert_eq!(main.resolved.get("../art/logo.png").map(String::as_str), Some("art/logo.png"));
        assert_eq!(
            graph.compute_build_order().unwrap(),
            vec!["src/math.ts", "src/main.ts"]
        );
    }

    #[test]
    fn test_unresolvable_import_names_importer() {
        let files = files(&[("main.js", "require('./missing');")]);
        match ModuleGraph::resolve("main.js", &files) {
            Err(BuildError::ModuleNotFound { module }) => {
                assert_eq!(module, "./missing (imported by main.js)")
            }
            other => panic!("expected ModuleNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_entry() {
        let files = files(&[("main.js", "")]);
        assert_eq!(
            ModuleGraph::resolve("src/main.js", &files),
            Err(BuildError::EntryNotFound {
                entry: "src/main.js".into()
            })
        );
    }

    #[test]
    fn test_import_cycle_between_files() {
        let files = files(&[
            ("a.js", "require('./b');"),
            ("b.js", "require('./a');"),
        ]);
        let graph = ModuleGraph::resolve("a.js", &files).unwrap();
        assert!(matches!(
            graph.compute_build_order(),
            Err(BuildError::CircularDependency(cycle)) if cycle == "a.js -> b.js -> a.js"
        ));
    }
}
