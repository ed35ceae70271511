//! Descriptor resolution
//!
//! Resolution checks referential integrity, interprets every mount, port and
//! restart policy, and orders services for startup. It stops at the first
//! problem; use the validator to collect all of them.

use super::graph::{DependencyGraph, StartupPlan};
use crate::descriptor::model::DependsOnConfig;
use crate::descriptor::mount::parse_mount;
use crate::descriptor::port::parse_port;
use crate::descriptor::{Document, Mount, PortMapping, RestartPolicy, Service};
use crate::error::{BerthError, ReferenceKind, Result};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Condition a dependency must reach before the dependent starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DependencyCondition {
    #[default]
    Started,
    Healthy,
    CompletedSuccessfully,
}

impl fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyCondition::Started => write!(f, "service_started"),
            DependencyCondition::Healthy => write!(f, "service_healthy"),
            DependencyCondition::CompletedSuccessfully => {
                write!(f, "service_completed_successfully")
            }
        }
    }
}

impl FromStr for DependencyCondition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "service_started" => Ok(DependencyCondition::Started),
            "service_healthy" => Ok(DependencyCondition::Healthy),
            "service_completed_successfully" => Ok(DependencyCondition::CompletedSuccessfully),
            other => Err(format!("unknown dependency condition '{}'", other)),
        }
    }
}

impl Serialize for DependencyCondition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved start-after constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub service: String,
    pub condition: DependencyCondition,
    pub required: bool,
}

/// Dependencies of a service with their conditions, in declaration order
pub fn dependencies_of(service: &Service) -> std::result::Result<Vec<Dependency>, String> {
    match &service.depends_on {
        None => Ok(Vec::new()),
        Some(DependsOnConfig::Array(arr)) => Ok(arr
            .iter()
            .map(|name| Dependency {
                service: name.clone(),
                condition: DependencyCondition::Started,
                required: true,
            })
            .collect()),
        Some(DependsOnConfig::Map(map)) => map
            .iter()
            .map(|(name, cond)| -> std::result::Result<Dependency, String> {
                let condition = match cond.condition.as_deref() {
                    Some(c) => c.parse::<DependencyCondition>()?,
                    None => DependencyCondition::Started,
                };
                Ok(Dependency {
                    service: name.clone(),
                    condition,
                    required: cond.required.unwrap_or(true),
                })
            })
            .collect(),
    }
}

/// A service with every reference resolved
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedService {
    /// Service name
    pub name: String,
    /// Effective container name
    pub container_name: String,
    /// Effective image reference
    pub image: String,
    /// Restart policy
    pub restart: RestartPolicy,
    /// Interpreted mounts
    pub mounts: Vec<Mount>,
    /// Interpreted port mappings
    pub ports: Vec<PortMapping>,
    /// Environment files, as written
    pub env_files: Vec<String>,
    /// Start-after constraints
    pub depends_on: Vec<Dependency>,
}

/// A fully resolved descriptor
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDescriptor {
    /// Project name
    pub project: String,
    /// Services in startup order
    pub services: Vec<ResolvedService>,
    /// Declared named volumes
    pub volumes: Vec<String>,
    /// Startup stages
    pub plan: StartupPlan,
}

impl ResolvedDescriptor {
    /// Look up a resolved service
    pub fn service(&self, name: &str) -> Option<&ResolvedService> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Confirm every `depends_on` and named-volume reference points at a
/// declared entity
pub fn check_references(document: &Document) -> Result<()> {
    for (name, service) in &document.services {
        for dep in service.dependency_names() {
            if !document.services.contains_key(dep) {
                return Err(BerthError::DanglingReference {
                    service: name.clone(),
                    kind: ReferenceKind::Dependency,
                    name: dep.to_string(),
                });
            }
        }
    }

    for (name, service) in &document.services {
        for mount in service.volumes.iter().flatten() {
            let mount = parse_mount(mount)?;
            if let Some(volume) = mount.volume_name() {
                if !document.declares_volume(volume) {
                    return Err(BerthError::DanglingReference {
                        service: name.clone(),
                        kind: ReferenceKind::Volume,
                        name: volume.to_string(),
                    });
                }
            }
        }
    }

    Ok(())
}

/// Effective container names must be unique, derived ones included
fn check_container_names(services: &[ResolvedService]) -> Result<()> {
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    for service in services {
        if let Some(first) = owners.insert(&service.container_name, &service.name) {
            return Err(BerthError::DuplicateContainerName {
                name: service.container_name.clone(),
                first: first.to_string(),
                second: service.name.clone(),
            });
        }
    }
    Ok(())
}

/// Normalize a project name: lowercase, only `[a-z0-9_-]`, starting with a
/// letter or digit
pub fn normalize_project_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .skip_while(|c| !c.is_ascii_alphanumeric())
        .collect()
}

/// Descriptor resolver
pub struct Resolver {
    project_name: String,
}

impl Resolver {
    /// Create a resolver for a project
    ///
    /// Fails when nothing of the name survives normalization, since derived
    /// image and container names would start with a bare `-`.
    pub fn new(project_name: &str) -> Result<Self> {
        let normalized = normalize_project_name(project_name);
        if normalized.is_empty() {
            return Err(BerthError::InvalidConfig(format!(
                "project name '{}' has no usable characters",
                project_name
            )));
        }
        Ok(Self {
            project_name: normalized,
        })
    }

    /// Create a resolver named after the document, falling back to `fallback`
    pub fn for_document(document: &Document, fallback: &str) -> Result<Self> {
        Self::new(document.name.as_deref().unwrap_or(fallback))
    }

    /// Project name used for derived names
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Resolve a document
    pub fn resolve(&self, document: &Document) -> Result<ResolvedDescriptor> {
        tracing::debug!("Resolving project {}", self.project_name);

        check_references(document)?;

        let plan = DependencyGraph::from_document(document).startup_plan()?;

        let mut services = Vec::with_capacity(document.services.len());
        for name in plan.order() {
            let service = document.service(&name)?;
            services.push(self.resolve_service(&name, service)?);
        }
        check_container_names(&services)?;

        Ok(ResolvedDescriptor {
            project: self.project_name.clone(),
            services,
            volumes: document.volume_names().map(str::to_string).collect(),
            plan,
        })
    }

    fn resolve_service(&self, name: &str, service: &Service) -> Result<ResolvedService> {
        let image = match (&service.image, &service.build) {
            (Some(image), _) => image.clone(),
            (None, Some(_)) => format!("{}-{}:latest", self.project_name, name),
            (None, None) => return Err(BerthError::MissingImage(name.to_string())),
        };

        let container_name = service
            .container_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}-1", self.project_name, name));

        let restart = match service.restart.as_deref() {
            Some(policy) => policy.parse()?,
            None => RestartPolicy::No,
        };

        let mounts = service
            .volumes
            .iter()
            .flatten()
            .map(parse_mount)
            .collect::<Result<Vec<_>>>()?;

        let ports = service
            .ports
            .iter()
            .flatten()
            .map(parse_port)
            .collect::<Result<Vec<_>>>()?;

        let depends_on = dependencies_of(service).map_err(|reason| {
            BerthError::InvalidConfig(format!("service '{}': {}", name, reason))
        })?;

        Ok(ResolvedService {
            name: name.to_string(),
            container_name,
            image,
            restart,
            mounts,
            ports,
            env_files: service
                .env_files()
                .into_iter()
                .map(|(path, _)| path.to_string())
                .collect(),
            depends_on,
        })
    }
}
