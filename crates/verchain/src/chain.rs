//! The version chain: a domain's total order of versions.
//!
//! Nodes live in a `Vec` and link to their neighbours by index. A chain is
//! validated once in [`Chain::build`] and never mutated afterwards, so it can
//! be shared across threads freely.

use core::fmt;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ChainFault, MigrateError};
use crate::version::Version;

/// Direction of a single hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From an older version to the next newer one.
    Up,
    /// From a newer version to the next older one.
    Down,
}

impl Direction {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// One version's entry in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionNode {
    version: Version,
    prev: Option<usize>,
    next: Option<usize>,
}

impl VersionNode {
    /// This node's version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Index of the next older node, `None` at the head.
    pub fn prev(&self) -> Option<usize> {
        self.prev
    }

    /// Index of the next newer node, `None` at the tail.
    pub fn next(&self) -> Option<usize> {
        self.next
    }
}

/// A single step between adjacent versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop<'a> {
    /// Version the payload is at before the hop.
    pub from: &'a Version,
    /// Version the payload is at after the hop.
    pub to: &'a Version,
    /// Which way the hop goes.
    pub direction: Direction,
}

impl<'a> Hop<'a> {
    /// The version whose hook performs this hop.
    ///
    /// Up hooks are declared "for upgrading to" a version and so live on
    /// `to`; down hooks are declared "for downgrading from" a version and
    /// live on `from`.
    pub fn hook_version(&self) -> &'a Version {
        match self.direction {
            Direction::Up => self.to,
            Direction::Down => self.from,
        }
    }
}

/// An ordered, doubly-linked sequence of versions for one migration domain.
///
/// # Example
///
/// ```
/// use verchain::{Chain, Direction, Version};
///
/// let versions = ["1", "2", "3"].map(|v| Version::new(v).unwrap());
/// let chain = Chain::build("sensors", versions.clone()).unwrap();
///
/// let hops = chain.hops_between(&versions[2], &versions[0]).unwrap();
/// assert_eq!(hops.len(), 2);
/// assert!(hops.iter().all(|h| h.direction == Direction::Down));
/// assert_eq!(hops[0].from, &versions[2]);
/// ```
#[derive(Debug, Clone)]
pub struct Chain {
    domain: String,
    nodes: Vec<VersionNode>,
    index: HashMap<Version, usize>,
}

impl Chain {
    /// Build a chain from versions listed oldest first.
    ///
    /// Fails with [`MigrateError::ChainIntegrity`] if the list is empty,
    /// repeats a version, or is not strictly increasing.
    pub fn build(
        domain: impl Into<String>,
        ordered_versions: impl IntoIterator<Item = Version>,
    ) -> Result<Self, MigrateError> {
        let domain = domain.into();
        let integrity = |fault| MigrateError::ChainIntegrity {
            domain: domain.clone(),
            fault,
        };

        let mut nodes: Vec<VersionNode> = Vec::new();
        let mut index = HashMap::new();
        for version in ordered_versions {
            if index.contains_key(&version) {
                return Err(integrity(ChainFault::DuplicateVersion(version)));
            }
            if let Some(last) = nodes.last() {
                if version <= last.version {
                    return Err(integrity(ChainFault::NotIncreasing {
                        prev: last.version.clone(),
                        next: version,
                    }));
                }
            }

            let i = nodes.len();
            if let Some(last) = nodes.last_mut() {
                last.next = Some(i);
            }
            index.insert(version.clone(), i);
            nodes.push(VersionNode {
                version,
                prev: i.checked_sub(1),
                next: None,
            });
        }

        if nodes.is_empty() {
            return Err(integrity(ChainFault::Empty));
        }

        let chain = Self {
            domain,
            nodes,
            index,
        };
        chain.verify()?;
        Ok(chain)
    }

    /// Return a new chain with `version` appended as the tail.
    pub fn extended(&self, version: Version) -> Result<Self, MigrateError> {
        let versions = self.versions().cloned().chain(core::iter::once(version));
        Self::build(self.domain.clone(), versions)
    }

    /// Check the structural invariants: one head, one tail, every node
    /// reachable from the head, and `node.next.prev == node`.
    pub fn verify(&self) -> Result<(), MigrateError> {
        let broken = |node: &VersionNode| MigrateError::ChainIntegrity {
            domain: self.domain.clone(),
            fault: ChainFault::BrokenLink(node.version.clone()),
        };

        let heads = self.nodes.iter().filter(|n| n.prev.is_none()).count();
        let tails = self.nodes.iter().filter(|n| n.next.is_none()).count();
        if heads != 1 || tails != 1 {
            return Err(broken(&self.nodes[0]));
        }

        let mut visited = 0;
        let mut cursor = Some(self.head_index());
        while let Some(i) = cursor {
            let node = self.nodes.get(i).ok_or_else(|| broken(&self.nodes[0]))?;
            visited += 1;
            if visited > self.nodes.len() {
                return Err(broken(node));
            }
            if let Some(n) = node.next {
                match self.nodes.get(n) {
                    Some(next) if next.prev == Some(i) && next.version > node.version => {}
                    _ => return Err(broken(node)),
                }
            }
            cursor = node.next;
        }

        if visited != self.nodes.len() {
            return Err(broken(&self.nodes[0]));
        }
        Ok(())
    }

    /// Name of the domain this chain orders.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Number of versions in the chain.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a built chain; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The oldest version.
    pub fn head(&self) -> &Version {
        &self.nodes[self.head_index()].version
    }

    /// The newest version.
    pub fn tail(&self) -> &Version {
        &self.nodes[self.nodes.len() - 1].version
    }

    fn head_index(&self) -> usize {
        0
    }

    /// Position of `version` in the chain, oldest first.
    pub fn position_of(&self, version: &Version) -> Option<usize> {
        self.index.get(version).copied()
    }

    /// True if `version` is a member of the chain.
    pub fn contains(&self, version: &Version) -> bool {
        self.index.contains_key(version)
    }

    /// The node at `position`.
    pub fn node(&self, position: usize) -> Option<&VersionNode> {
        self.nodes.get(position)
    }

    /// All versions, oldest first.
    pub fn versions(&self) -> impl DoubleEndedIterator<Item = &Version> + '_ {
        self.nodes.iter().map(|n| &n.version)
    }

    /// The adjacent newer version, if any.
    pub fn next_of(&self, version: &Version) -> Option<&Version> {
        let node = &self.nodes[self.position_of(version)?];
        node.next.map(|i| &self.nodes[i].version)
    }

    /// The adjacent older version, if any.
    pub fn prev_of(&self, version: &Version) -> Option<&Version> {
        let node = &self.nodes[self.position_of(version)?];
        node.prev.map(|i| &self.nodes[i].version)
    }

    pub(crate) fn require(&self, version: &Version) -> Result<usize, MigrateError> {
        self.position_of(version)
            .ok_or_else(|| MigrateError::UnknownVersion {
                domain: self.domain.clone(),
                version: version.clone(),
            })
    }

    /// The ordered hops that take a payload from `source` to `target`.
    ///
    /// Empty when `source == target`. Ascending `Up` hops when the target is
    /// newer, descending `Down` hops when it is older. Fails with
    /// [`MigrateError::UnknownVersion`] if either endpoint is not in the chain.
    pub fn hops_between(
        &self,
        source: &Version,
        target: &Version,
    ) -> Result<Vec<Hop<'_>>, MigrateError> {
        let from = self.require(source)?;
        let to = self.require(target)?;

        let mut hops = Vec::with_capacity(from.abs_diff(to));
        let mut cursor = from;
        while cursor != to {
            let node = &self.nodes[cursor];
            let (step, direction) = if to > cursor {
                (node.next, Direction::Up)
            } else {
                (node.prev, Direction::Down)
            };
            // `verify` guarantees both links exist between any two members.
            let Some(step) = step else {
                return Err(MigrateError::ChainIntegrity {
                    domain: self.domain.clone(),
                    fault: ChainFault::BrokenLink(node.version.clone()),
                });
            };
            hops.push(Hop {
                from: &node.version,
                to: &self.nodes[step].version,
                direction,
            });
            cursor = step;
        }
        Ok(hops)
    }
}
