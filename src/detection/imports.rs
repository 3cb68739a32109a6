//! Textual import graph built from file contents the agent has read.
//!
//! This is a best-effort heuristic, not a dependency analysis. Import
//! statements are pulled out of `read_file` results with a regular
//! expression (`from X import` and `import X`), so dynamic imports, aliases
//! and imports inside strings or comments are handled naively or missed.
//!
//! Each read file becomes a node named after its path as a dotted module
//! (`pkg/a.py` becomes `pkg.a`). An imported module resolves to a read file
//! when the file's module name equals it or ends with `.<module>`; other
//! imports stay as leaf nodes.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use regex::Regex;
use tracing::debug;

use crate::action::{tools, Action};

/// Matches `from X import` and `import X`.
const IMPORT_PATTERN: &str = r"from\s+(\S+)\s+import|import\s+(\S+)";

/// Module name for a file path: extension dropped, separators turned into
/// dots.
#[must_use]
pub fn module_name(path: &str) -> String {
    let path = path.trim_start_matches("./");
    let stem = match path.rfind('.') {
        Some(idx) if !path[idx..].contains(['/', '\\']) && idx > 0 => &path[..idx],
        _ => path,
    };
    stem.replace(['/', '\\'], ".")
}

/// Imported module names found in `content`, in order of appearance.
#[must_use]
pub fn extract_imports(content: &str) -> Vec<String> {
    let Ok(re) = Regex::new(IMPORT_PATTERN) else {
        return Vec::new();
    };
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| {
            m.as_str()
                .trim_end_matches([',', ';'])
                .trim_start_matches('.')
                .to_string()
        })
        .filter(|m| !m.is_empty())
        .collect()
}

/// Directed graph from read modules to the modules they import.
#[derive(Debug, Clone, Default)]
pub struct ImportGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl ImportGraph {
    /// Builds the graph from `read_file` actions carrying result content.
    #[must_use]
    pub fn from_actions(actions: &[Action]) -> Self {
        let mut raw: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for action in actions {
            let (Some(path), Some(content)) = (read_path(action), action.result_content()) else {
                continue;
            };
            raw.entry(module_name(path))
                .or_default()
                .extend(extract_imports(content));
        }

        let nodes: Vec<String> = raw.keys().cloned().collect();
        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (module, imports) in raw {
            let targets = edges.entry(module).or_default();
            for import in imports {
                targets.insert(resolve(&nodes, &import));
            }
        }

        debug!(nodes = edges.len(), "Built import graph");
        Self { edges }
    }

    /// Module node for a `read_file` action, if it has a path.
    #[must_use]
    pub fn module_of(&self, action: &Action) -> Option<String> {
        read_path(action).map(module_name)
    }

    /// Modules directly imported by `module`.
    #[must_use]
    pub fn imports_of(&self, module: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(module)
    }

    /// Every distinct cycle reachable by depth-first search.
    ///
    /// Each cycle is returned as a closed path (`[a, b, a]`) rotated to
    /// start at its smallest module name, and reported once.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut finished: HashSet<&str> = HashSet::new();
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut cycles = Vec::new();

        for start in self.edges.keys() {
            if finished.contains(start.as_str()) {
                continue;
            }
            let mut path: Vec<&str> = Vec::new();
            self.visit(start, &mut path, &mut finished, &mut |cycle: &[&str]| {
                let canonical = canonical(cycle);
                if seen.insert(canonical.clone()) {
                    cycles.push(canonical);
                }
            });
        }
        cycles
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        path: &mut Vec<&'a str>,
        finished: &mut HashSet<&'a str>,
        on_cycle: &mut dyn FnMut(&[&str]),
    ) {
        if let Some(pos) = path.iter().position(|n| *n == node) {
            on_cycle(&path[pos..]);
            return;
        }
        if finished.contains(node) {
            return;
        }

        path.push(node);
        if let Some(targets) = self.edges.get(node) {
            for target in targets {
                self.visit(target, path, finished, on_cycle);
            }
        }
        path.pop();
        finished.insert(node);
    }
}

fn read_path(action: &Action) -> Option<&str> {
    if action.tool == tools::READ_FILE {
        action.file_path.as_deref()
    } else {
        None
    }
}

fn resolve(nodes: &[String], import: &str) -> String {
    let suffix = format!(".{}", import);
    nodes
        .iter()
        .find(|n| n.as_str() == import)
        .or_else(|| nodes.iter().find(|n| n.ends_with(&suffix)))
        .cloned()
        .unwrap_or_else(|| import.to_string())
}

/// Rotates an open cycle to start at its smallest node and closes it.
fn canonical(cycle: &[&str]) -> Vec<String> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, n)| **n)
        .map_or(0, |(i, _)| i);
    let mut out: Vec<String> = cycle[start..]
        .iter()
        .chain(&cycle[..start])
        .map(|n| (*n).to_string())
        .collect();
    if let Some(first) = out.first().cloned() {
        out.push(first);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ActionBuilder;
    use serde_json::json;

    fn read(path: &str, content: &str) -> Action {
        ActionBuilder::new("read_file")
            .file(path)
            .result(json!({ "content": content }))
            .build()
    }

    #[test]
    fn test_module_name() {
        assert_eq!(module_name("pkg/a.py"), "pkg.a");
        assert_eq!(module_name("./pkg/sub/b.py"), "pkg.sub.b");
        assert_eq!(module_name("pkg\\c.py"), "pkg.c");
        assert_eq!(module_name("Makefile"), "Makefile");
        assert_eq!(module_name("dir.d/file"), "dir.d.file");
    }

    #[test]
    fn test_extract_imports() {
        let content = "import os\nfrom pkg.b import helper\nimport sys, json\nfrom . import x\nfrom .sibling import y\n";
        assert_eq!(
            extract_imports(content),
            vec!["os", "pkg.b", "sys", "sibling"]
        );
    }

    #[test]
    fn test_resolves_relative_module_names() {
        let graph = ImportGraph::from_actions(&[
            read("src/pkg/a.py", "from pkg.b import f"),
            read("src/pkg/b.py", "import os"),
        ]);
        let targets = graph.imports_of("src.pkg.a").unwrap();
        assert!(targets.contains("src.pkg.b"));
    }

    #[test]
    fn test_two_node_cycle() {
        let graph = ImportGraph::from_actions(&[read("b.py", "import a"), read("a.py", "import b")]);
        assert_eq!(graph.cycles(), vec![vec!["a", "b", "a"]]);
    }

    #[test]
    fn test_three_node_cycle_reported_once() {
        let graph = ImportGraph::from_actions(&[
            read("a.py", "import b"),
            read("b.py", "import c"),
            read("c.py", "import a"),
        ]);
        assert_eq!(graph.cycles(), vec![vec!["a", "b", "c", "a"]]);
    }

    #[test]
    fn test_self_import_is_a_cycle() {
        let graph = ImportGraph::from_actions(&[read("a.py", "import a")]);
        assert_eq!(graph.cycles(), vec![vec!["a", "a"]]);
    }

    #[test]
    fn test_ignores_non_read_actions() {
        let edit = ActionBuilder::new("str_replace")
            .file("a.py")
            .result(json!({"content": "import b"}))
            .build();
        let graph = ImportGraph::from_actions(&[edit, read("b.py", "import a")]);
        assert!(graph.cycles().is_empty());
    }

    #[test]
    fn test_acyclic_graph() {
        let graph = ImportGraph::from_actions(&[
            read("a.py", "import b\nimport c"),
            read("b.py", "import c"),
            read("c.py", "import os"),
        ]);
        assert!(graph.cycles().is_empty());
    }
}
