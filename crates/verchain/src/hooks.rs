//! Per-version hook tables with an identity default.

use core::fmt;
use core::hash::Hash;
use std::collections::HashMap;

use crate::chain::Direction;
use crate::error::{HookError, MigrateError};
use crate::version::Version;

/// A single-hop payload transform.
///
/// A hook is scoped to one version node and one adjacent hop: an `Up` hook
/// upgrades *to* its version, a `Down` hook downgrades *from* it. Hooks must
/// be deterministic and must not retain the payload.
///
/// Closures of the shape `Fn(P, &C) -> Result<P, HookError>` implement this
/// trait; implement it by hand for hooks that carry configuration.
pub trait Transform<P, C: ?Sized>: Send + Sync {
    /// Transform `payload` across this hook's hop.
    fn apply(&self, payload: P, ctx: &C) -> Result<P, HookError>;
}

impl<P, C: ?Sized, F> Transform<P, C> for F
where
    F: Fn(P, &C) -> Result<P, HookError> + Send + Sync,
{
    fn apply(&self, payload: P, ctx: &C) -> Result<P, HookError> {
        self(payload, ctx)
    }
}

/// The transform every unregistered key resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity;

impl<P, C: ?Sized> Transform<P, C> for Identity {
    fn apply(&self, payload: P, _ctx: &C) -> Result<P, HookError> {
        Ok(payload)
    }
}

static IDENTITY: Identity = Identity;

/// Key under which a hook is registered at a version node.
pub trait HookKey: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync {
    /// The hop direction this hook serves.
    fn direction(&self) -> Direction;

    /// Operation name, for diagnostics.
    fn operation(&self) -> &str;
}

/// The variable-map mode keys hooks by direction alone.
impl HookKey for Direction {
    fn direction(&self) -> Direction {
        *self
    }

    fn operation(&self) -> &str {
        match self {
            Direction::Up => "migrate_up",
            Direction::Down => "migrate_down",
        }
    }
}

/// Maps `(version, key)` to an override transform.
///
/// Resolution never fails: a missing entry resolves to [`Identity`], since
/// most schema changes touch only a few operations.
pub struct HookRegistry<K, P, C: ?Sized> {
    domain: String,
    hooks: HashMap<Version, HashMap<K, Box<dyn Transform<P, C>>>>,
}

impl<K: HookKey, P, C: ?Sized> HookRegistry<K, P, C> {
    /// Create an empty registry for `domain`.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            hooks: HashMap::new(),
        }
    }

    /// Register `transform` at `version` under `key`.
    ///
    /// Fails with [`MigrateError::DuplicateHook`] if that exact key is
    /// already taken at that version.
    pub fn register(
        &mut self,
        version: Version,
        key: K,
        transform: Box<dyn Transform<P, C>>,
    ) -> Result<(), MigrateError> {
        let at_version = self.hooks.entry(version.clone()).or_default();
        if at_version.contains_key(&key) {
            return Err(MigrateError::DuplicateHook {
                domain: self.domain.clone(),
                version,
                key: key.to_string(),
            });
        }
        at_version.insert(key, transform);
        Ok(())
    }

    /// The override registered at `version` under `key`, if any.
    pub fn get(&self, version: &Version, key: &K) -> Option<&dyn Transform<P, C>> {
        self.hooks
            .get(version)
            .and_then(|at| at.get(key))
            .map(|hook| hook.as_ref())
    }

    /// The override at `version` under `key`, or the identity transform.
    pub fn resolve(&self, version: &Version, key: &K) -> &dyn Transform<P, C> {
        match self.get(version, key) {
            Some(hook) => hook,
            None => &IDENTITY,
        }
    }

    /// True if an override is registered at `version` under `key`.
    pub fn is_overridden(&self, version: &Version, key: &K) -> bool {
        self.get(version, key).is_some()
    }

    /// Versions that carry at least one override, oldest first.
    pub fn versions(&self) -> Vec<&Version> {
        let mut versions: Vec<_> = self
            .hooks
            .iter()
            .filter(|(_, at)| !at.is_empty())
            .map(|(v, _)| v)
            .collect();
        versions.sort();
        versions
    }

    /// All registered `(version, key)` pairs, ordered by version.
    pub fn registered(&self) -> Vec<(&Version, &K)> {
        let mut entries: Vec<_> = self
            .hooks
            .iter()
            .flat_map(|(v, at)| at.keys().map(move |k| (v, k)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.to_string().cmp(&b.1.to_string())));
        entries
    }

    /// Total number of registered overrides.
    pub fn len(&self) -> usize {
        self.hooks.values().map(HashMap::len).sum()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: HookKey, P, C: ?Sized> fmt::Debug for HookRegistry<K, P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("domain", &self.domain)
            .field("registered", &self.registered())
            .finish()
    }
}
