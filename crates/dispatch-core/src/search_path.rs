//! Explicit node selection.
//!
//! A search path names the nodes a query must go to, overriding load balancing.
//! The syntax is `path (';' path)*` where each path is `parts? ('/' row?)?`:
//!
//! - `parts` is a comma separated list of node positions within a group, either a
//!   single position `N` or a half-open range `[N,M>`; `*` or nothing means all.
//! - `row` is the group id. Without it the first group having nodes at the
//!   requested positions is used.
//!
//! Alternatives separated by `;` are tried in order and the first one selecting
//! any node wins. Positions or rows outside the cluster select nothing.

use std::ops::Range;
use std::sync::Arc;

use dispatch_common::protocol::{DispatchError, Result};

use crate::group::Group;
use crate::node::Node;
use crate::search_cluster::SearchCluster;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    /// `None` selects every node of the group
    parts: Option<Vec<Range<usize>>>,
    row: Option<u32>,
}

impl SearchPath {
    /// Parses all `;` separated alternatives. An empty expression has none.
    pub fn parse(expr: &str) -> Result<Vec<SearchPath>> {
        if expr.trim().is_empty() {
            return Ok(Vec::new());
        }
        expr.split(';').map(Self::parse_one).collect()
    }

    /// Resolves an expression to the nodes of its first alternative that selects any.
    pub fn select_nodes(expr: &str, cluster: &SearchCluster) -> Result<Vec<Arc<Node>>> {
        for path in Self::parse(expr)? {
            let nodes = path.select(cluster);
            if !nodes.is_empty() {
                return Ok(nodes);
            }
        }
        Ok(Vec::new())
    }

    pub fn row(&self) -> Option<u32> {
        self.row
    }

    pub fn select(&self, cluster: &SearchCluster) -> Vec<Arc<Node>> {
        match self.row {
            Some(row) => cluster
                .group(row)
                .map(|group| self.pick(group))
                .unwrap_or_default(),
            None => cluster
                .ordered_groups()
                .iter()
                .map(|group| self.pick(group))
                .find(|nodes| !nodes.is_empty())
                .unwrap_or_default(),
        }
    }

    fn pick(&self, group: &Group) -> Vec<Arc<Node>> {
        let Some(parts) = &self.parts else {
            return group.nodes().to_vec();
        };
        let mut selected: Vec<Arc<Node>> = Vec::new();
        for range in parts {
            for node in group.nodes().iter().skip(range.start).take(range.len()) {
                if !selected.iter().any(|n| n.key() == node.key()) {
                    selected.push(Arc::clone(node));
                }
            }
        }
        selected
    }

    fn parse_one(path: &str) -> Result<SearchPath> {
        let path = path.trim();
        if path.is_empty() {
            return Err(invalid(path, "empty path"));
        }
        let (parts, row) = match path.split_once('/') {
            Some((parts, row)) => (parts.trim(), Some(row.trim())),
            None => (path, None),
        };

        let row = match row {
            None | Some("") => None,
            Some(row) => Some(
                row.parse::<u32>()
                    .map_err(|_| invalid(path, &format!("bad row '{row}'")))?,
            ),
        };
        let parts = match parts {
            "" | "*" => None,
            parts => Some(parse_parts(path, parts)?),
        };
        Ok(SearchPath { parts, row })
    }
}

fn parse_parts(path: &str, input: &str) -> Result<Vec<Range<usize>>> {
    let mut ranges = Vec::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start();
        let (range, tail) = if let Some(inner) = rest.strip_prefix('[') {
            let (body, tail) = inner
                .split_once('>')
                .ok_or_else(|| invalid(path, "unterminated range"))?;
            let (from, to) = body
                .split_once(',')
                .ok_or_else(|| invalid(path, "range needs two bounds"))?;
            let from = parse_position(path, from)?;
            let to = parse_position(path, to)?;
            if from >= to {
                return Err(invalid(path, &format!("empty range [{from},{to}>")));
            }
            (from..to, tail)
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let position = parse_position(path, &rest[..end])?;
            let next = position
                .checked_add(1)
                .ok_or_else(|| invalid(path, "position out of range"))?;
            (position..next, &rest[end..])
        };
        ranges.push(range);

        let tail = tail.trim_start();
        if tail.is_empty() {
            return Ok(ranges);
        }
        rest = tail
            .strip_prefix(',')
            .ok_or_else(|| invalid(path, &format!("unexpected '{tail}'")))?;
    }
}

fn parse_position(path: &str, s: &str) -> Result<usize> {
    let s = s.trim();
    s.parse::<usize>()
        .map_err(|_| invalid(path, &format!("bad node position '{s}'")))
}

fn invalid(path: &str, reason: &str) -> DispatchError {
    DispatchError::InvalidSearchPath(format!("'{path}': {reason}"))
}
