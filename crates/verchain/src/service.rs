//! RPC and record migrations.
//!
//! Payloads are structured records (field name to JSON value). Hooks are
//! keyed by operation name, direction and whether the payload is the call's
//! arguments or its response.

use core::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chain::Direction;
use crate::engine::{Domain, DomainBuilder, PlannedHop};
use crate::envelope::VersionedEnvelope;
use crate::error::{HookError, MigrateError};
use crate::hooks::{HookKey, Transform};
use crate::version::Version;

/// A structured payload: field name to value.
pub type Record = Map<String, Value>;

/// Which side of an RPC call a payload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The call's arguments.
    Args,
    /// The call's response.
    Response,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Args => f.write_str("args"),
            Self::Response => f.write_str("response"),
        }
    }
}

/// `(operation, direction, role)`: the key of an RPC hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    operation: String,
    direction: Direction,
    role: Role,
}

impl ServiceKey {
    /// Build a key.
    pub fn new(operation: impl Into<String>, direction: Direction, role: Role) -> Self {
        Self {
            operation: operation.into(),
            direction,
            role,
        }
    }

    /// Key of an args upgrade hook.
    pub fn args_up(operation: impl Into<String>) -> Self {
        Self::new(operation, Direction::Up, Role::Args)
    }

    /// Key of an args downgrade hook.
    pub fn args_down(operation: impl Into<String>) -> Self {
        Self::new(operation, Direction::Down, Role::Args)
    }

    /// Key of a response upgrade hook.
    pub fn response_up(operation: impl Into<String>) -> Self {
        Self::new(operation, Direction::Up, Role::Response)
    }

    /// Key of a response downgrade hook.
    pub fn response_down(operation: impl Into<String>) -> Self {
        Self::new(operation, Direction::Down, Role::Response)
    }

    /// The payload role.
    pub fn role(&self) -> Role {
        self.role
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.operation, self.role, self.direction)
    }
}

impl HookKey for ServiceKey {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn operation(&self) -> &str {
        &self.operation
    }
}

/// Caller-supplied data passed unmodified to every hook of a call.
///
/// Holds arbitrary JSON entries plus the wall-clock time captured when the
/// context was created, so hooks that stamp "now" stay deterministic within
/// one call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Context {
    entries: Map<String, Value>,
    now_ms: i64,
}

/// Context key under which a response migration finds the request args.
pub const ARGS_KEY: &str = "args";

impl Context {
    /// An empty context stamped with the current time.
    pub fn new() -> Self {
        Self::at(now_ms())
    }

    /// An empty context stamped with `now_ms`.
    pub fn at(now_ms: i64) -> Self {
        Self {
            entries: Map::new(),
            now_ms,
        }
    }

    /// Add an entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Attach the request args, for response migrations that depend on them.
    pub fn with_args(self, args: Record) -> Self {
        self.with(ARGS_KEY, Value::Object(args))
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// The request args, if attached.
    pub fn args(&self) -> Option<&Record> {
        self.get(ARGS_KEY).and_then(Value::as_object)
    }

    /// Milliseconds since the Unix epoch when the context was created.
    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// A migration domain for one RPC service or record type.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use verchain::{Context, Role, ServiceDomain, ServiceKey, Version};
///
/// let v = |s: &str| Version::new(s).unwrap();
/// let domain = ServiceDomain::builder("Thermostat")
///     .versions([v("1"), v("2")])
///     .hook(v("2"), ServiceKey::args_up("set_target"), |mut args, _| {
///         args.insert("unit".into(), json!("celsius"));
///         Ok(args)
///     })
///     .build()
///     .unwrap();
///
/// let args = json!({"target": 21}).as_object().cloned().unwrap();
/// let migrated = domain
///     .migrate("set_target", Role::Args, &v("1"), &v("2"), args, &Context::at(0))
///     .unwrap();
/// assert_eq!(migrated["unit"], "celsius");
/// ```
#[derive(Debug)]
pub struct ServiceDomain {
    inner: Domain<ServiceKey, Record, Context>,
}

impl ServiceDomain {
    /// Start declaring a service domain.
    pub fn builder(name: impl Into<String>) -> ServiceDomainBuilder {
        ServiceDomainBuilder {
            inner: DomainBuilder::new(name),
        }
    }

    /// The underlying generic domain.
    pub fn domain(&self) -> &Domain<ServiceKey, Record, Context> {
        &self.inner
    }

    /// Domain name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Oldest declared version.
    pub fn oldest(&self) -> &Version {
        self.inner.chain().head()
    }

    /// Newest declared version.
    pub fn newest(&self) -> &Version {
        self.inner.chain().tail()
    }

    /// Migrate `payload` for `operation` from `source` to `target`.
    pub fn migrate(
        &self,
        operation: &str,
        role: Role,
        source: &Version,
        target: &Version,
        payload: Record,
        ctx: &Context,
    ) -> Result<Record, MigrateError> {
        self.inner.migrate_with(source, target, payload, ctx, |direction| {
            ServiceKey::new(operation, direction, role)
        })
    }

    /// Migrate call arguments.
    pub fn migrate_args(
        &self,
        operation: &str,
        source: &Version,
        target: &Version,
        args: Record,
        ctx: &Context,
    ) -> Result<Record, MigrateError> {
        self.migrate(operation, Role::Args, source, target, args, ctx)
    }

    /// Migrate a call response.
    pub fn migrate_response(
        &self,
        operation: &str,
        source: &Version,
        target: &Version,
        response: Record,
        ctx: &Context,
    ) -> Result<Record, MigrateError> {
        self.migrate(operation, Role::Response, source, target, response, ctx)
    }

    /// Apply one version's hook for `key`, or identity.
    pub fn step(
        &self,
        version: &Version,
        key: &ServiceKey,
        payload: Record,
        ctx: &Context,
    ) -> Result<Record, MigrateError> {
        self.inner.step(version, key, payload, ctx)
    }

    /// The hops a migration of `operation` would run.
    pub fn plan(
        &self,
        operation: &str,
        role: Role,
        source: &Version,
        target: &Version,
    ) -> Result<Vec<PlannedHop<ServiceKey>>, MigrateError> {
        self.inner.plan(source, target, |direction| {
            ServiceKey::new(operation, direction, role)
        })
    }

    /// Migrate a stored record: read its envelope, migrate the JSON body to
    /// `target` and re-tag it.
    pub fn migrate_record_bytes(
        &self,
        operation: &str,
        bytes: &[u8],
        target: &Version,
        ctx: &Context,
    ) -> Result<Vec<u8>, MigrateError> {
        let envelope = VersionedEnvelope::from_bytes(bytes)?;
        let record: Record = serde_json::from_slice(&envelope.payload)
            .map_err(|e| MigrateError::Codec(e.to_string()))?;
        let migrated = self.migrate(operation, Role::Args, &envelope.version, target, record, ctx)?;
        let payload =
            serde_json::to_vec(&migrated).map_err(|e| MigrateError::Codec(e.to_string()))?;
        Ok(VersionedEnvelope::new(target.clone(), payload).to_bytes())
    }
}

/// Declares a [`ServiceDomain`].
pub struct ServiceDomainBuilder {
    inner: DomainBuilder<ServiceKey, Record, Context>,
}

impl ServiceDomainBuilder {
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

    /// Register a hook at `version`.
    pub fn hook<F>(mut self, version: Version, key: ServiceKey, hook: F) -> Self
    where
        F: Fn(Record, &Context) -> Result<Record, HookError> + Send + Sync + 'static,
    {
        self.inner = self.inner.hook(version, key, hook);
        self
    }

    /// Register a [`Transform`] implementation at `version`.
    pub fn transform<T>(mut self, version: Version, key: ServiceKey, transform: T) -> Self
    where
        T: Transform<Record, Context> + 'static,
    {
        self.inner = self.inner.transform(version, key, transform);
        self
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<ServiceDomain, MigrateError> {
        Ok(ServiceDomain {
            inner: self.inner.build()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(label: &str) -> Version {
        Version::new(label).unwrap()
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn bump(field: &'static str, by: i64) -> impl Fn(Record, &Context) -> Result<Record, HookError> {
        move |mut r: Record, _: &Context| {
            let n = r
                .get(field)
                .and_then(Value::as_i64)
                .ok_or_else(|| HookError::field(field, "an integer"))?;
            r.insert(field.into(), json!(n + by));
            Ok(r)
        }
    }

    fn scenario_domain() -> ServiceDomain {
        ServiceDomain::builder("Scenario")
            .versions([v("1"), v("2"), v("3")])
            .hook(v("2"), ServiceKey::args_up("op"), bump("n", 1))
            .hook(v("2"), ServiceKey::args_down("op"), bump("n", -1))
            .build()
            .unwrap()
    }

    #[test]
    fn increments_on_upgrade() {
        let d = scenario_domain();
        let out = d
            .migrate("op", Role::Args, &v("1"), &v("3"), record(json!({"n": 5})), &Context::at(0))
            .unwrap();
        assert_eq!(out, record(json!({"n": 6})));
    }

    #[test]
    fn decrements_on_downgrade() {
        let d = scenario_domain();
        let out = d
            .migrate("op", Role::Args, &v("3"), &v("1"), record(json!({"n": 6})), &Context::at(0))
            .unwrap();
        assert_eq!(out, record(json!({"n": 5})));
    }

    #[test]
    fn role_and_operation_select_hooks() {
        let d = scenario_domain();
        let payload = record(json!({"n": 5}));
        let response = d
            .migrate_response("op", &v("1"), &v("3"), payload.clone(), &Context::at(0))
            .unwrap();
        assert_eq!(response, payload);
        let other = d
            .migrate_args("other_op", &v("1"), &v("3"), payload.clone(), &Context::at(0))
            .unwrap();
        assert_eq!(other, payload);
    }

    #[test]
    fn hook_error_carries_operation() {
        let d = scenario_domain();
        let err = d
            .migrate_args("op", &v("1"), &v("2"), record(json!({"n": "x"})), &Context::at(0))
            .unwrap_err();
        match err {
            MigrateError::HookExecution {
                operation,
                direction,
                version,
                ..
            } => {
                assert_eq!(operation, "op");
                assert_eq!(direction, Direction::Up);
                assert_eq!(version, v("2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn context_exposes_args_and_time() {
        let ctx = Context::at(1234)
            .with("request_id", "abc")
            .with_args(record(json!({"peripheral_name": "p"})));
        assert_eq!(ctx.now_ms(), 1234);
        assert_eq!(ctx.get("request_id"), Some(&json!("abc")));
        assert_eq!(ctx.args().unwrap()["peripheral_name"], "p");
        assert!(Context::new().now_ms() > 0);
    }

    #[test]
    fn key_display() {
        assert_eq!(ServiceKey::response_down("read").to_string(), "read/response/down");
    }

    #[test]
    fn record_bytes_are_retagged() {
        let d = scenario_domain();
        let stored = VersionedEnvelope::new(v("1"), serde_json::to_vec(&json!({"n": 1})).unwrap());
        let out = d
            .migrate_record_bytes("op", &stored.to_bytes(), &v("3"), &Context::at(0))
            .unwrap();
        let env = VersionedEnvelope::from_bytes(&out).unwrap();
        assert_eq!(env.version, v("3"));
        let body: Value = serde_json::from_slice(&env.payload).unwrap();
        assert_eq!(body, json!({"n": 2}));
    }

    #[test]
    fn plan_lists_overrides() {
        let d = scenario_domain();
        let plan = d.plan("op", Role::Args, &v("3"), &v("1")).unwrap();
        let overridden: Vec<_> = plan.iter().map(|h| h.overridden).collect();
        assert_eq!(overridden, vec![false, true]);
    }
}
