//! Segment Trie over Path Templates
//!
//! Path templates are segment based: `/api/{id}/books` with `{name}`
//! captures and `{name:glob}` glob captures. At every level an exact segment
//! beats a single-name capture, which beats a glob capture; templates with
//! identical shape share a terminal and are rejected as ambiguous by the
//! caller if their other constraints overlap.

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use glob::Pattern;
use indexmap::IndexMap;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Exact(String),
    Capture(String),
    Glob(String, Pattern),
}

fn parse_template(template: &str) -> PipelineResult<Vec<Segment>> {
    if !template.starts_with('/') {
        return Err(PipelineError::configuration(format!(
            "path template {template:?} does not start with '/'"
        )));
    }

    let mut segments = Vec::new();
    for part in template.split('/').filter(|part| !part.is_empty()) {
        if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            match inner.split_once(':') {
                Some((name, pattern)) => {
                    let pattern = Pattern::new(pattern).map_err(|e| {
                        PipelineError::configuration(format!(
                            "invalid glob in path template {template:?}"
                        ))
                        .with_source(e)
                    })?;
                    segments.push(Segment::Glob(name.to_string(), pattern));
                }
                None => segments.push(Segment::Capture(inner.to_string())),
            }
        } else if part.contains('{') || part.contains('}') {
            return Err(PipelineError::configuration(format!(
                "malformed capture in path template {template:?}"
            )));
        } else {
            segments.push(Segment::Exact(part.to_string()));
        }
    }

    Ok(segments)
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

struct Terminal<T> {
    capture_names: Vec<String>,
    value: T,
}

struct Node<T> {
    exact: HashMap<String, Node<T>>,
    capture: Option<Box<Node<T>>>,
    globs: Vec<(Pattern, Node<T>)>,
    terminal: Option<Terminal<T>>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            capture: None,
            globs: Vec::new(),
            terminal: None,
        }
    }
}

/// Trie mapping path templates to values
pub struct PathTrie<T> {
    root: Node<T>,
    len: usize,
}

impl<T> Default for PathTrie<T> {
    fn default() -> Self {
        Self {
            root: Node::default(),
            len: 0,
        }
    }
}

impl<T> PathTrie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the terminal value for a template, creating the path on demand
    ///
    /// Two templates with the same shape (identical exact segments, captures
    /// at the same positions, identical glob patterns) share one terminal.
    pub fn get_or_insert_with(
        &mut self,
        template: &str,
        create: impl FnOnce() -> T,
    ) -> PipelineResult<&mut T> {
        let segments = parse_template(template)?;

        let mut capture_names = Vec::new();
        let mut node = &mut self.root;

        for segment in segments {
            node = match segment {
                Segment::Exact(part) => node.exact.entry(part).or_default(),
                Segment::Capture(name) => {
                    capture_names.push(name);
                    node.capture.get_or_insert_with(Box::default)
                }
                Segment::Glob(name, pattern) => {
                    capture_names.push(name);
                    let position = node.globs.iter().position(|(p, _)| *p == pattern);
                    match position {
                        Some(position) => &mut node.globs[position].1,
                        None => {
                            node.globs.push((pattern, Node::default()));
                            let last = node.globs.len() - 1;
                            &mut node.globs[last].1
                        }
                    }
                }
            };
        }

        if node.terminal.is_none() {
            node.terminal = Some(Terminal {
                capture_names,
                value: create(),
            });
            self.len += 1;
        }

        match &mut node.terminal {
            Some(terminal) => Ok(&mut terminal.value),
            None => Err(PipelineError::internal("path trie terminal vanished")),
        }
    }

    /// All values whose template matches the path, most specific first,
    /// together with their captured segments
    pub fn find(&self, path: &str) -> Vec<(&T, IndexMap<String, String>)> {
        let segments = split_path(path);
        let mut captured = Vec::new();
        let mut matches = Vec::new();

        Self::search(&self.root, &segments, &mut captured, &mut matches);

        matches
            .into_iter()
            .map(|(terminal, captured)| {
                let captures = terminal
                    .capture_names
                    .iter()
                    .cloned()
                    .zip(captured)
                    .collect();
                (&terminal.value, captures)
            })
            .collect()
    }

    fn search<'a>(
        node: &'a Node<T>,
        segments: &[&str],
        captured: &mut Vec<String>,
        matches: &mut Vec<(&'a Terminal<T>, Vec<String>)>,
    ) {
        let Some((head, rest)) = segments.split_first() else {
            if let Some(terminal) = &node.terminal {
                matches.push((terminal, captured.clone()));
            }
            return;
        };

        if let Some(child) = node.exact.get(*head) {
            Self::search(child, rest, captured, matches);
        }

        if let Some(child) = &node.capture {
            captured.push((*head).to_string());
            Self::search(child, rest, captured, matches);
            captured.pop();
        }

        for (pattern, child) in &node.globs {
            if pattern.matches(head) {
                captured.push((*head).to_string());
                Self::search(child, rest, captured, matches);
                captured.pop();
            }
        }
    }
}
