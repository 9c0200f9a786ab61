//! Version manifests: the declared version lists of every domain.
//!
//! A manifest is a TOML document listing each domain and its versions,
//! oldest first:
//!
//! ```toml
//! [[domain]]
//! name = "RemoteBridge"
//! kind = "service"
//! versions = ["20180221", "20180420"]
//!
//! [[domain]]
//! name = "motion_detection"
//! kind = "peripheral"
//! versions = ["20181018"]
//! ```
//!
//! Hooks are registered in code; the manifest only fixes the order.

use core::fmt;
use std::collections::HashSet;

use serde::Deserialize;

use crate::version::Version;

/// Top-level manifest structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Declared domains.
    #[serde(rename = "domain", default)]
    pub domains: Vec<DomainManifest>,
}

/// What kind of payload a domain migrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainKind {
    /// RPC arguments/responses or stored records.
    Service,
    /// Peripheral variable maps.
    Peripheral,
    /// Peripheral variable maps, applying to every peripheral type.
    Global,
}

/// One domain's declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainManifest {
    /// Domain name (service name or peripheral type).
    pub name: String,
    /// Payload kind.
    pub kind: DomainKind,
    /// Version labels, oldest first.
    pub versions: Vec<String>,
}

impl DomainManifest {
    /// The declared versions, parsed.
    ///
    /// Fails with every invalid label rather than dropping any of them.
    pub fn versions(&self) -> Result<Vec<Version>, ManifestError> {
        let mut versions = Vec::with_capacity(self.versions.len());
        let mut errors = Vec::new();
        for label in &self.versions {
            match Version::new(label.as_str()) {
                Ok(version) => versions.push(version),
                Err(e) => errors.push(ValidationError {
                    domain: Some(self.name.clone()),
                    version: Some(label.clone()),
                    message: e.to_string(),
                }),
            }
        }
        if errors.is_empty() {
            Ok(versions)
        } else {
            Err(ManifestError::Invalid(errors))
        }
    }
}

/// A single validation error with context about where it occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub domain: Option<String>,
    pub version: Option<String>,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ctx = Vec::new();
        if let Some(d) = &self.domain {
            ctx.push(format!("domain={d}"));
        }
        if let Some(v) = &self.version {
            ctx.push(format!("version={v}"));
        }
        if ctx.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "[{}] {}", ctx.join(", "), self.message)
        }
    }
}

/// Error loading a manifest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// The document is not valid TOML for a manifest.
    #[error("failed to parse version manifest: {0}")]
    Parse(String),
    /// The manifest parsed but failed validation.
    #[error("invalid version manifest: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),
    /// A requested domain is not declared.
    #[error("domain `{0}` is not declared in the version manifest")]
    UnknownDomain(String),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Manifest {
    /// Parse and validate a manifest.
    pub fn from_toml_str(source: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest =
            toml::from_str(source).map_err(|e| ManifestError::Parse(e.to_string()))?;
        validate_manifest(&manifest).map_err(ManifestError::Invalid)?;
        Ok(manifest)
    }

    /// Look up a domain by name.
    pub fn domain(&self, name: &str) -> Result<&DomainManifest, ManifestError> {
        self.domains
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| ManifestError::UnknownDomain(name.to_owned()))
    }

    /// All domains of `kind`.
    pub fn domains_of(&self, kind: DomainKind) -> impl Iterator<Item = &DomainManifest> {
        self.domains.iter().filter(move |d| d.kind == kind)
    }
}

/// Validate a parsed manifest. Returns `Ok(())` if valid, or every error found.
pub fn validate_manifest(manifest: &Manifest) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if manifest.domains.is_empty() {
        errors.push(ValidationError {
            domain: None,
            version: None,
            message: "manifest must declare at least one domain".into(),
        });
    }

    if manifest.domains_of(DomainKind::Global).count() > 1 {
        errors.push(ValidationError {
            domain: None,
            version: None,
            message: "at most one global peripheral domain may be declared".into(),
        });
    }

    let mut names = HashSet::new();
    for domain in &manifest.domains {
        if !names.insert(domain.name.as_str()) {
            errors.push(ValidationError {
                domain: Some(domain.name.clone()),
                version: None,
                message: "duplicate domain name".into(),
            });
        }
        validate_domain(domain, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_domain(domain: &DomainManifest, errors: &mut Vec<ValidationError>) {
    if domain.name.trim().is_empty() {
        errors.push(ValidationError {
            domain: Some(domain.name.clone()),
            version: None,
            message: "domain name must not be empty".into(),
        });
    }

    if domain.versions.is_empty() {
        errors.push(ValidationError {
            domain: Some(domain.name.clone()),
            version: None,
            message: "domain must declare at least one version".into(),
        });
        return;
    }

    let mut prev: Option<Version> = None;
    let mut seen = HashSet::new();
    for label in &domain.versions {
        let version = match Version::new(label.as_str()) {
            Ok(v) => v,
            Err(e) => {
                errors.push(ValidationError {
                    domain: Some(domain.name.clone()),
                    version: Some(label.clone()),
                    message: e.to_string(),
                });
                continue;
            }
        };

        if !seen.insert(version.clone()) {
            errors.push(ValidationError {
                domain: Some(domain.name.clone()),
                version: Some(label.clone()),
                message: "duplicate version".into(),
            });
        } else if let Some(p) = &prev {
            if version <= *p {
                errors.push(ValidationError {
                    domain: Some(domain.name.clone()),
                    version: Some(label.clone()),
                    message: format!("versions must increase; {label} follows {p}"),
                });
            }
        }
        prev = Some(version);
    }
}
