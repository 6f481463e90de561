use std::collections::BTreeMap;

use crate::caller::Caller;

/// Name segment that matches any query segment.
pub const WILDCARD: &str = "*";
/// Suffix marking a guard route.
pub const GUARD_SUFFIX: char = '!';
/// Route answered with the names below the node it is reached from.
pub const API_ROUTE: &str = "api";

/// Route table: a trie of dotted name segments.
///
/// Each node may carry a callable and a guard. A guard registered as
/// `"a.b!"` protects every route under `a.b`; `"!"` protects everything.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    root: Node,
}

#[derive(Debug, Clone, Default)]
struct Node {
    caller: Option<Caller>,
    guard: Option<Caller>,
    children: BTreeMap<String, Node>,
}

/// Where a query landed after unfolding.
#[derive(Debug)]
pub enum Target<'r> {
    Caller(&'r Caller),
    /// Names listed by a synthesized `api` route.
    Api(Vec<String>),
}

/// Result of walking a query through the registry.
#[derive(Debug)]
pub struct Unfold<'r, 'q> {
    /// What the query reached, if anything.
    pub target: Option<Target<'r>>,
    /// Segments consumed, joined with `.`.
    pub route: String,
    /// Guards on the way down, outermost first.
    pub guards: Vec<&'r Caller>,
    /// Route of the innermost guarded node, `None` when nothing is guarded.
    pub scope: Option<String>,
    /// Unconsumed query text.
    pub rest: &'q str,
}

impl Unfold<'_, '_> {
    /// Whether the walk consumed anything at all.
    pub fn matched(&self) -> bool {
        !self.route.is_empty() || matches!(self.target, Some(Target::Api(_)))
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `caller` under a dotted `name`; a trailing `!` makes it a guard.
    ///
    /// Registering a name twice replaces the earlier callable.
    pub fn add(&mut self, name: &str, caller: Caller) {
        let (path, guard) = match name.strip_suffix(GUARD_SUFFIX) {
            Some(path) => (path, true),
            None => (name, false),
        };
        let mut node = &mut self.root;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        if guard {
            node.guard = Some(caller);
        } else {
            node.caller = Some(caller);
        }
    }

    /// All callable route names, sorted, guards excluded.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.root.collect("", &mut names);
        names.sort();
        names
    }

    /// Walk `query` segment by segment, as deep as the registry allows.
    pub fn unfold<'r, 'q>(&'r self, query: &'q str) -> Unfold<'r, 'q> {
        let mut unfold = Unfold {
            target: None,
            route: String::new(),
            guards: Vec::new(),
            scope: None,
            rest: query,
        };
        let mut node = &self.root;
        unfold.enter(node);

        // `candidate` is what the next segment is read from; `unfold.rest`
        // only moves once a segment matches, so a miss leaves the separator.
        let mut candidate = query;
        loop {
            let (segment, after) = split_segment(candidate);
            if segment.is_empty() {
                break;
            }
            if let Some(child) = node.children.get(segment) {
                node = child;
                unfold.push(segment);
                unfold.enter(node);
                unfold.rest = after;
            } else if segment == API_ROUTE {
                let mut names = Vec::new();
                node.collect("", &mut names);
                names.sort();
                unfold.target = Some(Target::Api(names));
                unfold.rest = after;
                return unfold;
            } else if let Some(wild) = node.children.get(WILDCARD) {
                node = wild;
                unfold.push(WILDCARD);
                unfold.enter(node);
                unfold.rest = candidate;
                break;
            } else {
                break;
            }
            match after.strip_prefix('.') {
                Some(next) => candidate = next,
                None => break,
            }
        }

        if unfold.matched() || is_argument_text(unfold.rest) {
            unfold.target = node.caller.as_ref().map(Target::Caller);
        }
        unfold
    }
}

impl<'r> Unfold<'r, '_> {
    fn push(&mut self, segment: &str) {
        if !self.route.is_empty() {
            self.route.push('.');
        }
        self.route.push_str(segment);
    }

    fn enter(&mut self, node: &'r Node) {
        if let Some(guard) = &node.guard {
            self.guards.push(guard);
            self.scope = Some(self.route.clone());
        }
    }
}

impl Node {
    fn collect(&self, prefix: &str, names: &mut Vec<String>) {
        for (segment, child) in &self.children {
            let name = if prefix.is_empty() {
                segment.clone()
            } else {
                format!("{prefix}.{segment}")
            };
            if child.caller.is_some() {
                names.push(name.clone());
            }
            child.collect(&name, names);
        }
    }
}

/// Split off the leading name segment.
fn split_segment(text: &str) -> (&str, &str) {
    let end = text
        .find(|c: char| matches!(c, '.' | '[' | '{' | '?') || c.is_whitespace())
        .unwrap_or(text.len());
    text.split_at(end)
}

/// Text that carries only arguments for the root callable.
fn is_argument_text(text: &str) -> bool {
    match text.chars().next() {
        None => true,
        Some(c) => matches!(c, '[' | '{' | '?') || c.is_whitespace(),
    }
}
