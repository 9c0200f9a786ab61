//! Variable-map migrations for peripheral device state.
//!
//! The payload is always a pair of maps: variable values (a value may be
//! explicitly null, marking a deleted variable) and last-set timestamps.
//! Neither map is required to contain the other's keys, and hooks must treat
//! absence as an ordinary state.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::chain::Direction;
use crate::engine::{Domain, DomainBuilder};
use crate::envelope::VersionedEnvelope;
use crate::error::{HookError, MigrateError};
use crate::version::Version;

/// A peripheral's variables and their last-set timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableState {
    /// Variable name to value; `None` marks a deleted variable.
    pub variables: BTreeMap<String, Option<String>>,
    /// Variable name to last-set timestamp in milliseconds.
    pub timestamps: BTreeMap<String, i64>,
}

impl VariableState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a variable and, optionally, its timestamp.
    pub fn with(mut self, name: &str, value: Option<&str>, timestamp: Option<i64>) -> Self {
        self.set(name, value.map(str::to_owned), timestamp);
        self
    }

    /// The non-null value of `name`, if present.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.variables.get(name).and_then(|v| v.as_deref())
    }

    /// The timestamp of `name`, if present.
    pub fn timestamp(&self, name: &str) -> Option<i64> {
        self.timestamps.get(name).copied()
    }

    /// True if `name` is present in the variables map, null or not.
    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Set a variable's value, and its timestamp when one is given.
    pub fn set(&mut self, name: &str, value: Option<String>, timestamp: Option<i64>) {
        self.variables.insert(name.to_owned(), value);
        if let Some(ts) = timestamp {
            self.timestamps.insert(name.to_owned(), ts);
        }
    }

    /// Move `old` to `new` in each map independently.
    ///
    /// A key missing from one map is simply not moved in that map.
    pub fn rename(&mut self, old: &str, new: &str) {
        if let Some(value) = self.variables.remove(old) {
            self.variables.insert(new.to_owned(), value);
        }
        if let Some(ts) = self.timestamps.remove(old) {
            self.timestamps.insert(new.to_owned(), ts);
        }
    }

    /// Remove `name` from both maps.
    pub fn remove(&mut self, name: &str) {
        self.variables.remove(name);
        self.timestamps.remove(name);
    }

    /// True if both maps are empty.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.timestamps.is_empty()
    }

    /// Encode with postcard.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MigrateError> {
        postcard::to_allocvec(self).map_err(|e| MigrateError::Codec(e.to_string()))
    }

    /// Decode from postcard bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MigrateError> {
        postcard::from_bytes(bytes).map_err(|e| MigrateError::Codec(e.to_string()))
    }
}

/// Ancillary data for peripheral hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeripheralContext {
    /// Device currently performing the migration, when known.
    pub device_id: Option<String>,
    /// Wall-clock time captured by the caller, in milliseconds.
    pub now_ms: i64,
}

impl PeripheralContext {
    /// Context for `device_id` stamped with the current time.
    pub fn for_device(device_id: Option<&str>) -> Self {
        Self::at(device_id, crate::service::now_ms())
    }

    /// Context for `device_id` stamped with `now_ms`.
    pub fn at(device_id: Option<&str>, now_ms: i64) -> Self {
        Self {
            device_id: device_id.map(str::to_owned),
            now_ms,
        }
    }
}

/// The migration chain of one peripheral type.
///
/// Hooks are keyed by direction only.
#[derive(Debug)]
pub struct PeripheralDomain {
    inner: Domain<Direction, VariableState, PeripheralContext>,
}

impl PeripheralDomain {
    /// Start declaring the chain of `peripheral_type`.
    pub fn builder(peripheral_type: impl Into<String>) -> PeripheralDomainBuilder {
        PeripheralDomainBuilder {
            inner: DomainBuilder::new(peripheral_type),
        }
    }

    /// The peripheral type name.
    pub fn peripheral_type(&self) -> &str {
        self.inner.name()
    }

    /// The underlying generic domain.
    pub fn domain(&self) -> &Domain<Direction, VariableState, PeripheralContext> {
        &self.inner
    }

    /// Migrate state from `source` to `target` along this peripheral's chain.
    pub fn migrate(
        &self,
        source: &Version,
        target: &Version,
        state: VariableState,
        ctx: &PeripheralContext,
    ) -> Result<VariableState, MigrateError> {
        self.inner.migrate_with(source, target, state, ctx, |d| d)
    }

    /// Apply the hook at `version` in `direction`, or identity.
    pub fn step(
        &self,
        version: &Version,
        direction: Direction,
        state: VariableState,
        ctx: &PeripheralContext,
    ) -> Result<VariableState, MigrateError> {
        self.inner.step(version, &direction, state, ctx)
    }

    /// True if a hook is registered at `version` in `direction`.
    pub fn has_hook(&self, version: &Version, direction: Direction) -> bool {
        self.inner.hooks().is_overridden(version, &direction)
    }

    /// Migrate an enveloped, postcard-encoded state to `target`.
    pub fn migrate_envelope(
        &self,
        bytes: &[u8],
        target: &Version,
        ctx: &PeripheralContext,
    ) -> Result<Vec<u8>, MigrateError> {
        let envelope = VersionedEnvelope::from_bytes(bytes)?;
        let state = VariableState::from_bytes(&envelope.payload)?;
        let migrated = self.migrate(&envelope.version, target, state, ctx)?;
        Ok(VersionedEnvelope::new(target.clone(), migrated.to_bytes()?).to_bytes())
    }
}

/// Declares a [`PeripheralDomain`].
pub struct PeripheralDomainBuilder {
    inner: DomainBuilder<Direction, VariableState, PeripheralContext>,
}

impl PeripheralDomainBuilder {
    /// Append a version as the new tail.
    pub fn version(mut self, version: Version) -> Self {
        self.inner = self.inner.version(version);
        self
    }

    /// Append several versions, oldest first.
    pub fn versions(mut self, versions: impl IntoIterator<Item = Version>) -> Self {
        self.inner = self.inner.versions(versions);
        self
    }

    /// Register the hook that upgrades state to `version`.
    pub fn up<F>(mut self, version: Version, hook: F) -> Self
    where
        F: Fn(VariableState, &PeripheralContext) -> Result<VariableState, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.inner = self.inner.hook(version, Direction::Up, hook);
        self
    }

    /// Register the hook that downgrades state from `version`.
    pub fn down<F>(mut self, version: Version, hook: F) -> Self
    where
        F: Fn(VariableState, &PeripheralContext) -> Result<VariableState, HookError>
            + Send
            + Sync
            + 'static,
    {
        self.inner = self.inner.hook(version, Direction::Down, hook);
        self
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<PeripheralDomain, MigrateError> {
        Ok(PeripheralDomain {
            inner: self.inner.build()?,
        })
    }
}

/// Every peripheral type's chain, plus one global chain applying to all.
///
/// Single-step resolution for a `(peripheral, version, direction)` belongs
/// to the peripheral's own chain when that chain declares the version (its
/// hook or identity), otherwise to the global chain, otherwise identity.
#[derive(Debug, Default)]
pub struct PeripheralCatalog {
    global: Option<PeripheralDomain>,
    peripherals: HashMap<String, PeripheralDomain>,
}

impl PeripheralCatalog {
    /// Start declaring a catalog.
    pub fn builder() -> PeripheralCatalogBuilder {
        PeripheralCatalogBuilder::default()
    }

    /// The chain of `peripheral_type`, if declared.
    pub fn get(&self, peripheral_type: &str) -> Option<&PeripheralDomain> {
        self.peripherals.get(peripheral_type)
    }

    /// The global chain, if declared.
    pub fn global(&self) -> Option<&PeripheralDomain> {
        self.global.as_ref()
    }

    /// Declared peripheral type names, sorted.
    pub fn peripheral_types(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.peripherals.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Apply the one hook that governs `peripheral_type` at `version`.
    ///
    /// Used by service hooks that migrate embedded peripheral state one
    /// service version at a time.
    pub fn step(
        &self,
        peripheral_type: &str,
        version: &Version,
        direction: Direction,
        state: VariableState,
        ctx: &PeripheralContext,
    ) -> Result<VariableState, MigrateError> {
        if let Some(domain) = self.get(peripheral_type) {
            if domain.domain().chain().contains(version) {
                return domain.step(version, direction, state, ctx);
            }
        }
        match &self.global {
            Some(global) => global.step(version, direction, state, ctx),
            None => Ok(state),
        }
    }

    /// Migrate state along `peripheral_type`'s own chain.
    ///
    /// A peripheral type with no declared chain has never changed shape, so
    /// its state passes through unchanged.
    pub fn migrate(
        &self,
        peripheral_type: &str,
        source: &Version,
        target: &Version,
        state: VariableState,
        ctx: &PeripheralContext,
    ) -> Result<VariableState, MigrateError> {
        match self.get(peripheral_type) {
            Some(domain) => domain.migrate(source, target, state, ctx),
            None => Ok(state),
        }
    }
}

/// Declares a [`PeripheralCatalog`].
#[derive(Default)]
pub struct PeripheralCatalogBuilder {
    global: Option<PeripheralDomainBuilder>,
    peripherals: Vec<PeripheralDomainBuilder>,
}

impl PeripheralCatalogBuilder {
    /// Declare the global chain.
    pub fn global(mut self, domain: PeripheralDomainBuilder) -> Self {
        self.global = Some(domain);
        self
    }

    /// Declare one peripheral type's chain.
    pub fn peripheral(mut self, domain: PeripheralDomainBuilder) -> Self {
        self.peripherals.push(domain);
        self
    }

    /// Build every chain and check that no peripheral chain declares a
    /// version the global chain also declares.
    pub fn build(self) -> Result<PeripheralCatalog, MigrateError> {
        let global = self.global.map(PeripheralDomainBuilder::build).transpose()?;

        let mut peripherals = HashMap::new();
        for builder in self.peripherals {
            let domain = builder.build()?;
            let name = domain.peripheral_type().to_owned();
            if let Some(global) = &global {
                let global_chain = global.domain().chain();
                if let Some(version) = domain
                    .domain()
                    .chain()
                    .versions()
                    .find(|v| global_chain.contains(v))
                {
                    return Err(MigrateError::ConflictingGlobalVersion {
                        peripheral: name,
                        version: version.clone(),
                    });
                }
            }
            if peripherals.contains_key(&name) {
                return Err(MigrateError::DuplicateDomain(name));
            }
            peripherals.insert(name, domain);
        }

        Ok(PeripheralCatalog {
            global,
            peripherals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(label: &str) -> Version {
        Version::new(label).unwrap()
    }

    fn rename_domain() -> PeripheralDomain {
        PeripheralDomain::builder("renamer")
            .versions([v("1"), v("2")])
            .up(v("2"), |mut s: VariableState, _: &PeripheralContext| {
                s.rename("old_variable", "new_variable");
                Ok(s)
            })
            .down(v("2"), |mut s: VariableState, _: &PeripheralContext| {
                s.rename("new_variable", "old_variable");
                Ok(s)
            })
            .build()
            .unwrap()
    }

    fn ctx() -> PeripheralContext {
        PeripheralContext::at(Some("device-1"), 1_000)
    }

    #[test]
    fn rename_moves_both_maps() {
        let d = rename_domain();
        let state = VariableState::new().with("old_variable", Some("5"), Some(100));
        let out = d.migrate(&v("1"), &v("2"), state, &ctx()).unwrap();
        assert_eq!(out, VariableState::new().with("new_variable", Some("5"), Some(100)));
        assert!(!out.has_variable("old_variable"));
        assert_eq!(out.timestamp("old_variable"), None);
    }

    #[test]
    fn rename_tolerates_missing_timestamp() {
        let d = rename_domain();
        let state = VariableState::new().with("old_variable", None, None);
        let out = d.migrate(&v("1"), &v("2"), state, &ctx()).unwrap();
        assert!(out.has_variable("new_variable"));
        assert_eq!(out.value("new_variable"), None);
        assert!(out.timestamps.is_empty());
    }

    #[test]
    fn delete_removes_from_both_maps() {
        let d = PeripheralDomain::builder("deleter")
            .versions([v("1"), v("2")])
            .up(v("2"), |mut s: VariableState, _: &PeripheralContext| {
                s.remove("old_variable");
                Ok(s)
            })
            .build()
            .unwrap();
        let state = VariableState::new().with("old_variable", None, None);
        let out = d.migrate(&v("1"), &v("2"), state, &ctx()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn catalog_prefers_specific_then_global() {
        let catalog = PeripheralCatalog::builder()
            .global(
                PeripheralDomain::builder("global")
                    .versions([v("3")])
                    .up(v("3"), |mut s: VariableState, _: &PeripheralContext| {
                        s.set("global", Some("1".into()), None);
                        Ok(s)
                    }),
            )
            .peripheral(
                PeripheralDomain::builder("lamp")
                    .versions([v("1"), v("2")])
                    .up(v("2"), |mut s: VariableState, _: &PeripheralContext| {
                        s.set("lamp", Some("1".into()), None);
                        Ok(s)
                    }),
            )
            .build()
            .unwrap();

        let lamp = catalog
            .step("lamp", &v("2"), Direction::Up, VariableState::new(), &ctx())
            .unwrap();
        assert_eq!(lamp.value("lamp"), Some("1"));

        let global = catalog
            .step("lamp", &v("3"), Direction::Up, VariableState::new(), &ctx())
            .unwrap();
        assert_eq!(global.value("global"), Some("1"));

        let untouched = catalog
            .step("lamp", &v("4"), Direction::Up, VariableState::new(), &ctx())
            .unwrap();
        assert!(untouched.is_empty());

        assert_eq!(catalog.peripheral_types(), vec!["lamp"]);
        let passthrough = VariableState::new().with("x", Some("1"), None);
        assert_eq!(
            catalog
                .migrate("unknown", &v("1"), &v("2"), passthrough.clone(), &ctx())
                .unwrap(),
            passthrough
        );
    }

    #[test]
    fn catalog_rejects_global_conflict() {
        let err = PeripheralCatalog::builder()
            .global(
                PeripheralDomain::builder("global")
                    .versions([v("2")])
                    .up(v("2"), |s: VariableState, _: &PeripheralContext| Ok(s)),
            )
            .peripheral(
                PeripheralDomain::builder("lamp")
                    .versions([v("1"), v("2")])
                    .down(v("2"), |s: VariableState, _: &PeripheralContext| Ok(s)),
            )
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            MigrateError::ConflictingGlobalVersion {
                peripheral: "lamp".into(),
                version: v("2"),
            }
        );
    }

    #[test]
    fn declared_version_without_hook_shadows_global() {
        let catalog = PeripheralCatalog::builder()
            .global(
                PeripheralDomain::builder("global")
                    .versions([v("3")])
                    .down(v("3"), |mut s: VariableState, _: &PeripheralContext| {
                        s.set("global", Some("1".into()), None);
                        Ok(s)
                    }),
            )
            .peripheral(
                PeripheralDomain::builder("lamp")
                    .versions([v("2")])
                    .up(v("2"), |mut s: VariableState, _: &PeripheralContext| {
                        s.set("lamp", Some("1".into()), None);
                        Ok(s)
                    }),
            )
            .build()
            .unwrap();

        let down = catalog
            .step("lamp", &v("2"), Direction::Down, VariableState::new(), &ctx())
            .unwrap();
        assert!(down.is_empty());

        let other = catalog
            .step("switch", &v("3"), Direction::Down, VariableState::new(), &ctx())
            .unwrap();
        assert_eq!(other.value("global"), Some("1"));
    }

    #[test]
    fn catalog_rejects_declared_conflict_without_hooks() {
        let err = PeripheralCatalog::builder()
            .global(
                PeripheralDomain::builder("global")
                    .versions([v("2")])
                    .up(v("2"), |s: VariableState, _: &PeripheralContext| Ok(s)),
            )
            .peripheral(PeripheralDomain::builder("lamp").versions([v("1"), v("2")]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            MigrateError::ConflictingGlobalVersion {
                peripheral: "lamp".into(),
                version: v("2"),
            }
        );
    }

    #[test]
    fn envelope_roundtrip_through_migration() {
        let d = rename_domain();
        let state = VariableState::new().with("old_variable", Some("5"), Some(100));
        let stored = VersionedEnvelope::new(v("1"), state.to_bytes().unwrap()).to_bytes();
        let migrated = d.migrate_envelope(&stored, &v("2"), &ctx()).unwrap();
        let env = VersionedEnvelope::from_bytes(&migrated).unwrap();
        assert_eq!(env.version, v("2"));
        let back = VariableState::from_bytes(&env.payload).unwrap();
        assert_eq!(back.value("new_variable"), Some("5"));
    }
}
