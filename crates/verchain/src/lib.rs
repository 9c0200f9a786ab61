//! # verchain
//!
//! Ordered version chains and bidirectional migration dispatch.
//!
//! A *domain* (a remote service, a persisted record store, a peripheral
//! type) declares its schema versions oldest first and registers hooks at
//! the versions where its payload shape changed. Migrating a payload from
//! one version to another walks the chain one hop at a time and runs the
//! right hook at each hop.
//!
//! ## How It Works
//!
//! 1. Versions are declared in order and linked into a [`Chain`].
//! 2. Hooks are registered per version and per operation key.
//! 3. An up hop `a → b` runs `b`'s up hook; a down hop `b → a` runs `b`'s
//!    down hook. A version without a hook for the requested operation is
//!    the identity.
//! 4. A failed hook aborts the migration; the caller keeps its original
//!    payload.
//!
//! ## Key Concepts
//!
//! - **No skipping**: every intermediate version gets its chance to run.
//! - **Deterministic**: hooks see only the payload and an explicit context,
//!   so the same input always migrates to the same output.
//! - **Validated at setup**: chains and hook registrations are checked when
//!   a domain is built, never during dispatch.
//!
//! ## Example
//!
//! ```
//! use verchain::{Context, Record, ServiceDomain, ServiceKey, Version};
//! use serde_json::json;
//!
//! let v = |label: &str| Version::new(label).unwrap();
//!
//! let domain = ServiceDomain::builder("Thermostat")
//!     .versions([v("20180221"), v("20180420")])
//!     .hook(v("20180420"), ServiceKey::args_up("set_target"), |mut args: Record, _: &Context| {
//!         if let Some(f) = args.remove("fahrenheit") {
//!             args.insert("target".into(), f);
//!         }
//!         Ok(args)
//!     })
//!     .build()
//!     .unwrap();
//!
//! let args = json!({ "fahrenheit": 70 }).as_object().cloned().unwrap();
//! let migrated = domain
//!     .migrate_args("set_target", &v("20180221"), &v("20180420"), args, &Context::new())
//!     .unwrap();
//! assert_eq!(migrated["target"], 70);
//! ```

mod chain;
mod engine;
mod envelope;
mod error;
mod hooks;
mod manifest;
mod service;
mod varmap;
mod version;

pub use chain::{Chain, Direction, Hop, VersionNode};
pub use engine::{Domain, DomainBuilder, PlannedHop};
pub use envelope::{EnvelopeError, VersionedEnvelope, MAGIC_BYTE, MIN_ENVELOPE_SIZE};
pub use error::{ChainFault, HookError, MigrateError};
pub use hooks::{HookKey, HookRegistry, Identity, Transform};
pub use manifest::{
    validate_manifest, DomainKind, DomainManifest, Manifest, ManifestError, ValidationError,
};
pub use service::{
    Context, Record, Role, ServiceDomain, ServiceDomainBuilder, ServiceKey, ARGS_KEY,
};
pub use varmap::{
    PeripheralCatalog, PeripheralCatalogBuilder, PeripheralContext, PeripheralDomain,
    PeripheralDomainBuilder, VariableState,
};
pub use version::{Version, VersionError, MAX_VERSION_LEN};
