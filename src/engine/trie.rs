//! Condition trie.
//!
//! A model group declares conditions as pipe-delimited matcher paths, one
//! token per schema function:
//!
//! ```text
//! "US|mobile" ─┐
//! "US|*"      ─┼─ build ──▶  Branch{ "US": Branch{ "mobile": Leaf, "*": Leaf },
//! "*|*"       ─┘                     "*":  Branch{ "*": Leaf } }
//! ```
//!
//! Lookup walks one token per level. At every branch the exact token wins;
//! otherwise the literal wildcard `*` is tried. Wildcards live on branches, so
//! an exact override and a catch-all can sit side by side at any depth.
//!
//! ## Invariants
//!
//! - Every root-to-leaf path has the same length (`ConditionTrie::depth`).
//! - The trie is immutable once built.

use std::collections::HashMap;

use crate::error::{ConfigError, MatchFailure};

/// Separator between matcher tokens in a condition path.
pub const PATH_SEPARATOR: &str = "|";
/// Matcher token that stands for any characteristic value.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq)]
pub enum TrieNode<V> {
    Branch(HashMap<String, TrieNode<V>>),
    Leaf(V),
}

#[derive(Debug, Clone)]
pub struct ConditionTrie<V> {
    root: TrieNode<V>,
    depth: usize,
}

impl<V> ConditionTrie<V> {
    /// Build a trie from `(matcher path, value)` entries.
    ///
    /// Blank tokens are kept as empty matchers. Two entries with the same path
    /// are rejected, as are entries that disagree on path length.
    pub fn build<I, K>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
    {
        let mut depth = None;
        let mut split = Vec::new();

        for (path, value) in entries {
            let tokens: Vec<String> = path.as_ref().split(PATH_SEPARATOR).map(str::to_string).collect();
            match depth {
                None => depth = Some(tokens.len()),
                Some(expected) if expected != tokens.len() => {
                    return Err(ConfigError::InconsistentPathLength { prefix: String::new() });
                }
                Some(_) => {}
            }
            split.push((tokens, value));
        }

        let root = build_node(split, 0, &mut Vec::new())?;
        Ok(ConditionTrie { root, depth: depth.unwrap_or(0) })
    }

    /// Number of tokens every successful lookup path must have.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root(&self) -> &TrieNode<V> {
        &self.root
    }

    /// Walk the trie with `path`, one element per level.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Result<&V, MatchFailure> {
        let mut node = &self.root;

        for (position, token) in path.iter().enumerate() {
            let token = token.as_ref();
            node = match node {
                TrieNode::Leaf(_) => {
                    return Err(MatchFailure::ArgumentCountMismatch { expected: self.depth, actual: path.len() });
                }
                TrieNode::Branch(children) => match children.get(token).or_else(|| children.get(WILDCARD)) {
                    Some(child) => child,
                    None => return Err(MatchFailure::ActionAbsent { position, token: token.to_string() }),
                },
            };
        }

        match node {
            TrieNode::Leaf(value) => Ok(value),
            TrieNode::Branch(_) => {
                Err(MatchFailure::ArgumentCountMismatch { expected: self.depth, actual: path.len() })
            }
        }
    }
}

/// Partition `entries` by the token at `level`, one branch per distinct token.
fn build_node<V>(
    entries: Vec<(Vec<String>, V)>,
    level: usize,
    prefix: &mut Vec<String>,
) -> Result<TrieNode<V>, ConfigError> {
    let exhausted = entries.iter().filter(|(tokens, _)| tokens.len() == level).count();

    if exhausted > 0 {
        if exhausted != entries.len() {
            return Err(ConfigError::InconsistentPathLength { prefix: prefix.join(PATH_SEPARATOR) });
        }
        let mut entries = entries.into_iter();
        return match (entries.next(), entries.next()) {
            (Some((_, value)), None) => Ok(TrieNode::Leaf(value)),
            _ => Err(ConfigError::DuplicateCondition(prefix.join(PATH_SEPARATOR))),
        };
    }

    // Keep first-seen token order so error reporting is deterministic.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<(Vec<String>, V)>> = HashMap::new();
    for (tokens, value) in entries {
        let token = tokens[level].clone();
        let group = groups.entry(token.clone()).or_insert_with(|| {
            order.push(token);
            Vec::new()
        });
        group.push((tokens, value));
    }

    let mut children = HashMap::with_capacity(order.len());
    for token in order {
        let Some(group) = groups.remove(&token) else { continue };
        prefix.push(token.clone());
        let child = build_node(group, level + 1, prefix)?;
        prefix.pop();
        children.insert(token, child);
    }

    Ok(TrieNode::Branch(children))
}
