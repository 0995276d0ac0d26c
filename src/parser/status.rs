//! `status` output parser
//!
//! The scheduler prints its tree as aligned columns: a node's depth is only
//! encoded by where it starts on the line. For example:
//!
//! ```text
//! /groucho/A157   {abo}   20200114 [abo]   00 [com]   production[com]
//!                                                     assim     [com]
//! ```
//!
//! `assim` starts under `production`, so it is a sibling of `production`
//! (a child of `00`). The parser remembers the matches of the previous line
//! ("open ancestors") and keeps those whose cumulative width fits in the
//! leading blanks of the new line.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{Result, TflowError};
use crate::status::FlowStatus;
use crate::tree::{NodeId, RootFlowNode};

static OUTPUT_IGNORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(# MSG|Welcome|Goodbye)").unwrap());

static STATUS_DETECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\w/]+)\s*[{\[](\w{3})[\]}](\s*)").unwrap());

/// Root trees found in a `status` output, in order of appearance
#[derive(Debug, Default)]
pub struct ParsedStatus {
    roots: Vec<RootFlowNode>,
}

impl ParsedStatus {
    /// Insert a root, replacing (in place) a previous root with the same name.
    /// Returns the index of the root.
    fn insert(&mut self, root: RootFlowNode) -> usize {
        match self.roots.iter().position(|r| r.name() == root.name()) {
            Some(idx) => {
                self.roots[idx] = root;
                idx
            }
            None => {
                self.roots.push(root);
                self.roots.len() - 1
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&RootFlowNode> {
        self.roots.iter().find(|r| r.name() == name)
    }

    /// Take ownership of one root tree
    pub fn remove(&mut self, name: &str) -> Option<RootFlowNode> {
        let idx = self.roots.iter().position(|r| r.name() == name)?;
        Some(self.roots.remove(idx))
    }

    pub fn names(&self) -> Vec<&str> {
        self.roots.iter().map(|r| r.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RootFlowNode> {
        self.roots.iter()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Same roots with structurally equal trees, whatever the order
impl PartialEq for ParsedStatus {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .roots
                .iter()
                .all(|r| other.get(r.name()).map_or(false, |o| o == r))
    }
}

impl IntoIterator for ParsedStatus {
    type Item = RootFlowNode;
    type IntoIter = std::vec::IntoIter<RootFlowNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.roots.into_iter()
    }
}

impl FromIterator<RootFlowNode> for ParsedStatus {
    fn from_iter<T: IntoIterator<Item = RootFlowNode>>(iter: T) -> Self {
        let mut parsed = ParsedStatus::default();
        for root in iter {
            parsed.insert(root);
        }
        parsed
    }
}

/// A match from a previous line: the node name and the width it occupied
struct OpenMatch {
    name: String,
    width: usize,
}

/// Parse the output of one or more `status` commands for `suite`.
pub fn parse_status_output(output: &str, suite: &str) -> Result<ParsedStatus> {
    let mut parsed = ParsedStatus::default();
    let mut from_suite = false;
    let mut current: Option<usize> = None;
    let mut last_matches: Vec<OpenMatch> = Vec::new();

    for (line_no, line) in output.split('\n').enumerate() {
        if OUTPUT_IGNORE.is_match(line) {
            continue;
        }
        let short_line = line.trim_start_matches(' ');
        let initial_blanks = line.chars().count() - short_line.chars().count();

        for (i_match, caps) in STATUS_DETECT.captures_iter(short_line).enumerate() {
            if i_match == 0 {
                // Keep the ancestors that fit in the leading blanks
                let mut matched_blanks = 0;
                let mut keep = 0;
                for open in &last_matches {
                    matched_blanks += open.width;
                    if matched_blanks > initial_blanks {
                        break;
                    }
                    keep += 1;
                }
                last_matches.truncate(keep);
            }

            let name = &caps[1];
            let status = FlowStatus::from_code(&caps[2], name)?;

            if last_matches.is_empty() {
                // The suite itself or a /suite/root entry
                from_suite = name == suite;
                if !from_suite {
                    let s_name: Vec<&str> = name.trim_matches('/').split('/').collect();
                    if s_name[0] != suite {
                        return Err(TflowError::SuiteMismatch {
                            found: name.to_string(),
                            expected: suite.to_string(),
                        });
                    }
                    match s_name.len() {
                        1 => from_suite = true,
                        2 => current = Some(parsed.insert(RootFlowNode::new(s_name[1], status))),
                        _ => {
                            return Err(TflowError::TreeTooDeep {
                                entry: name.to_string(),
                            })
                        }
                    }
                }
            } else if last_matches.len() == 1 && from_suite {
                current = Some(parsed.insert(RootFlowNode::new(name, status)));
            } else {
                let idx = current.ok_or_else(|| TflowError::StatusParse {
                    line: line_no + 1,
                    details: format!("'{}' appears before any root node", name),
                })?;
                let tree = &mut parsed.roots[idx];
                let mut parent = NodeId::ROOT;
                for open in last_matches.iter().skip(1 + usize::from(from_suite)) {
                    parent = tree
                        .node(parent)
                        .child(&open.name)
                        .map(|c| c.id())
                        .ok_or_else(|| TflowError::StatusParse {
                            line: line_no + 1,
                            details: format!("no parent '{}' for '{}'", open.name, name),
                        })?;
                }
                tree.add(parent, name, status);
            }

            last_matches.push(OpenMatch {
                name: name.to_string(),
                width: caps[0].chars().count(),
            });
        }
    }

    debug!(roots = ?parsed.names(), "Parsed status output");
    Ok(parsed)
}

/// The synthetic tree listing every root of `suite` (status only, no subtree)
pub fn build_tree_roots<'a>(suite: &str, roots: impl IntoIterator<Item = &'a RootFlowNode>) -> RootFlowNode {
    let mut tree_roots = RootFlowNode::new(suite, FlowStatus::Unknown);
    for root in roots {
        tree_roots.add(NodeId::ROOT, root.name(), root.status());
    }
    tree_roots
}
