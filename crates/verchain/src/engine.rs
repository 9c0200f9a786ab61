//! The generic migration domain: a chain plus a hook registry, and the
//! walk that applies one hook per hop.

use crate::chain::{Chain, Direction};
use crate::error::{HookError, MigrateError};
use crate::hooks::{HookKey, HookRegistry, Transform};
use crate::version::Version;

/// One hop of a migration, as it would run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedHop<K> {
    /// Version before the hop.
    pub from: Version,
    /// Version after the hop.
    pub to: Version,
    /// Hop direction.
    pub direction: Direction,
    /// Version whose hook runs.
    pub hook_version: Version,
    /// Key the hook is looked up under.
    pub key: K,
    /// False when the identity default runs.
    pub overridden: bool,
}

/// A migration domain: one chain plus its hook registry.
///
/// A domain is built once with a [`DomainBuilder`] and is immutable
/// afterwards. `migrate_with` walks the hops between two versions and
/// applies one hook per hop, left to right in traversal order.
///
/// # Example
///
/// ```
/// use verchain::{Direction, Domain, HookError, Version};
///
/// let v = |s: &str| Version::new(s).unwrap();
/// let domain: Domain<Direction, i64, ()> = Domain::builder("counter")
///     .versions([v("1"), v("2"), v("3")])
///     .hook(v("2"), Direction::Up, |n: i64, _: &()| Ok::<_, HookError>(n + 1))
///     .hook(v("2"), Direction::Down, |n: i64, _: &()| Ok::<_, HookError>(n - 1))
///     .build()
///     .unwrap();
///
/// assert_eq!(domain.migrate_with(&v("1"), &v("3"), 5, &(), |d| d).unwrap(), 6);
/// assert_eq!(domain.migrate_with(&v("3"), &v("1"), 6, &(), |d| d).unwrap(), 5);
/// ```
pub struct Domain<K, P, C: ?Sized> {
    chain: Chain,
    hooks: HookRegistry<K, P, C>,
}

impl<K: HookKey, P, C: ?Sized> Domain<K, P, C> {
    /// Start declaring a domain.
    pub fn builder(name: impl Into<String>) -> DomainBuilder<K, P, C> {
        DomainBuilder::new(name)
    }

    /// Domain name.
    pub fn name(&self) -> &str {
        self.chain.domain()
    }

    /// The version chain.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// The hook registry.
    pub fn hooks(&self) -> &HookRegistry<K, P, C> {
        &self.hooks
    }

    /// Migrate `payload` from `source` to `target`.
    ///
    /// `key_for` maps each hop's direction to the key its hook is registered
    /// under. Returns the payload unchanged when `source == target`. On a
    /// hook failure the partially migrated payload is dropped and
    /// [`MigrateError::HookExecution`] names the failing hop.
    pub fn migrate_with<F>(
        &self,
        source: &Version,
        target: &Version,
        payload: P,
        ctx: &C,
        key_for: F,
    ) -> Result<P, MigrateError>
    where
        F: Fn(Direction) -> K,
    {
        let hops = self.chain.hops_between(source, target)?;
        if hops.is_empty() {
            return Ok(payload);
        }

        tracing::debug!(
            domain = self.name(),
            %source,
            %target,
            hops = hops.len(),
            "migrating payload"
        );

        hops.iter().try_fold(payload, |payload, hop| {
            let key = key_for(hop.direction);
            self.apply_at(hop.hook_version(), &key, payload, ctx)
        })
    }

    /// Apply exactly one node's hook for `key`, or identity.
    ///
    /// Hooks that build on an adjacent node's behaviour call this
    /// explicitly; there is no implicit fallback to other versions.
    /// `version` need not be in the chain, in which case nothing is
    /// registered there and the payload passes through.
    pub fn step(&self, version: &Version, key: &K, payload: P, ctx: &C) -> Result<P, MigrateError> {
        self.apply_at(version, key, payload, ctx)
    }

    /// Describe the hops `migrate_with` would run, without running them.
    pub fn plan<F>(
        &self,
        source: &Version,
        target: &Version,
        key_for: F,
    ) -> Result<Vec<PlannedHop<K>>, MigrateError>
    where
        F: Fn(Direction) -> K,
    {
        let hops = self.chain.hops_between(source, target)?;
        Ok(hops
            .iter()
            .map(|hop| {
                let key = key_for(hop.direction);
                PlannedHop {
                    from: hop.from.clone(),
                    to: hop.to.clone(),
                    direction: hop.direction,
                    hook_version: hop.hook_version().clone(),
                    overridden: self.hooks.is_overridden(hop.hook_version(), &key),
                    key,
                }
            })
            .collect())
    }

    fn apply_at(&self, version: &Version, key: &K, payload: P, ctx: &C) -> Result<P, MigrateError> {
        tracing::trace!(
            domain = self.name(),
            %version,
            %key,
            overridden = self.hooks.is_overridden(version, key),
            "applying hook"
        );
        self.hooks
            .resolve(version, key)
            .apply(payload, ctx)
            .map_err(|source| {
                tracing::warn!(
                    domain = self.name(),
                    %version,
                    %key,
                    error = %source,
                    "migration hook failed"
                );
                MigrateError::HookExecution {
                    domain: self.name().to_string(),
                    version: version.clone(),
                    operation: key.operation().to_string(),
                    direction: key.direction(),
                    source,
                }
            })
    }
}

impl<K: HookKey, P, C: ?Sized> core::fmt::Debug for Domain<K, P, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Domain")
            .field("chain", &self.chain)
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Declares a [`Domain`]: its ordered versions and its hooks.
///
/// Registration errors are deferred to [`build`](Self::build) so a domain
/// can be declared fluently; the first error wins.
pub struct DomainBuilder<K, P, C: ?Sized> {
    name: String,
    versions: Vec<Version>,
    hooks: Vec<(Version, K, Box<dyn Transform<P, C>>)>,
}

impl<K: HookKey, P, C: ?Sized> DomainBuilder<K, P, C> {
    /// Start declaring a domain called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Append a version as the new tail.
    pub fn version(mut self, version: Version) -> Self {
        self.versions.push(version);
        self
    }

    /// Append several versions, oldest first.
    pub fn versions(mut self, versions: impl IntoIterator<Item = Version>) -> Self {
        self.versions.extend(versions);
        self
    }

    /// Register a closure hook at `version` under `key`.
    pub fn hook<F>(self, version: Version, key: K, hook: F) -> Self
    where
        F: Fn(P, &C) -> Result<P, HookError> + Send + Sync + 'static,
    {
        self.transform(version, key, hook)
    }

    /// Register a [`Transform`] implementation at `version` under `key`.
    pub fn transform<T>(mut self, version: Version, key: K, transform: T) -> Self
    where
        T: Transform<P, C> + 'static,
    {
        self.hooks.push((version, key, Box::new(transform)));
        self
    }

    /// Validate the declaration and freeze it into a [`Domain`].
    ///
    /// Fails with [`MigrateError::ChainIntegrity`] for a malformed version
    /// list, [`MigrateError::UnknownVersion`] for a hook on an undeclared
    /// version and [`MigrateError::DuplicateHook`] for a repeated key.
    pub fn build(self) -> Result<Domain<K, P, C>, MigrateError> {
        let chain = Chain::build(self.name.clone(), self.versions)?;
        let mut hooks = HookRegistry::new(self.name);
        for (version, key, transform) in self.hooks {
            chain.require(&version)?;
            hooks.register(version, key, transform)?;
        }

        tracing::debug!(
            domain = chain.domain(),
            versions = chain.len(),
            hooks = hooks.len(),
            "built migration domain"
        );
        Ok(Domain { chain, hooks })
    }
}
