//! Whole-document validation

use super::finding::{Report, Rule};
use crate::descriptor::mount::parse_mount;
use crate::descriptor::port::{parse_port, PortMapping, Protocol};
use crate::descriptor::{Document, RestartPolicy, Service};
use crate::resolve::graph::DependencyGraph;
use crate::resolve::resolver::{dependencies_of, DependencyCondition};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::LazyLock;

static SERVICE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("service name pattern is valid")
});

/// Validation options
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Warn when a referenced env file is missing on disk
    pub check_env_files: bool,
    /// Warn when a declared volume is never mounted
    pub warn_unused_volumes: bool,
    /// Directory relative paths are resolved against
    pub base_dir: Option<PathBuf>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            check_env_files: true,
            warn_unused_volumes: true,
            base_dir: None,
        }
    }
}

/// Published host binding, for conflict detection
struct Binding {
    service: String,
    host_ip: Option<IpAddr>,
}

impl Binding {
    fn overlaps(&self, other: &Binding) -> bool {
        match (self.host_ip, other.host_ip) {
            (Some(a), Some(b)) => a == b || a.is_unspecified() || b.is_unspecified(),
            _ => true,
        }
    }
}

/// Descriptor validator
///
/// Unlike resolution, validation never stops early: every rule runs and
/// all findings land in the report.
pub struct Validator {
    options: ValidationOptions,
}

impl Validator {
    /// Create a validator
    pub fn new(options: ValidationOptions) -> Self {
        Self { options }
    }

    /// Validate a document
    pub fn validate(&self, document: &Document) -> Report {
        let mut report = Report::default();
        let mut used_volumes = BTreeSet::new();
        let mut bindings: BTreeMap<(u16, Protocol), Vec<Binding>> = BTreeMap::new();

        for (name, service) in &document.services {
            let name = name.as_str();
            tracing::debug!("Validating service {}", name);

            if !SERVICE_NAME.is_match(name) {
                report.push(
                    Rule::InvalidServiceName,
                    Some(name),
                    format!("Service name '{}' must match [a-zA-Z0-9][a-zA-Z0-9_.-]*", name),
                );
            }

            if service.image.is_none() && service.build.is_none() {
                report.push(
                    Rule::MissingImage,
                    Some(name),
                    format!("Service '{}' must have either 'image' or 'build' specified", name),
                );
            }

            if service.container_name.is_none() {
                report.push(
                    Rule::MissingContainerName,
                    Some(name),
                    format!("Service '{}' has no container_name", name),
                );
            }

            if let Some(restart) = &service.restart {
                if restart.parse::<RestartPolicy>().is_err() {
                    report.push(
                        Rule::InvalidRestart,
                        Some(name),
                        format!("Service '{}' has invalid restart policy '{}'", name, restart),
                    );
                }
            }

            self.check_dependencies(document, name, service, &mut report);
            self.check_mounts(document, name, service, &mut used_volumes, &mut report);
            self.check_ports(name, service, &mut bindings, &mut report);
            self.check_networks(document, name, service, &mut report);
            self.check_env_files(name, service, &mut report);
        }

        check_container_names(document, &mut report);

        if let Some(cycle) = DependencyGraph::from_document(document).find_cycle() {
            report.push(
                Rule::CircularDependency,
                cycle.first().map(String::as_str),
                format!("Circular dependency: {}", cycle.join(" -> ")),
            );
        }

        if self.options.warn_unused_volumes {
            for volume in document.volume_names() {
                if !used_volumes.contains(volume) {
                    report.push(
                        Rule::UnusedVolume,
                        None,
                        format!("Volume '{}' is declared but never mounted", volume),
                    );
                }
            }
        }

        tracing::debug!(
            "Validation finished: {} error(s), {} warning(s)",
            report.error_count(),
            report.warning_count()
        );

        report
    }

    fn check_dependencies(
        &self,
        document: &Document,
        name: &str,
        service: &Service,
        report: &mut Report,
    ) {
        let dependencies = match dependencies_of(service) {
            Ok(deps) => deps,
            Err(reason) => {
                report.push(
                    Rule::InvalidDependencyCondition,
                    Some(name),
                    format!("Service '{}': {}", name, reason),
                );
                return;
            }
        };

        for dep in dependencies {
            match document.services.get(&dep.service) {
                None if dep.required => report.push(
                    Rule::DanglingDependency,
                    Some(name),
                    format!("Service '{}' depends on unknown service '{}'", name, dep.service),
                ),
                None => {
                    tracing::warn!(
                        "Service '{}' has an optional dependency on unknown service '{}'",
                        name,
                        dep.service
                    );
                }
                Some(target)
                    if dep.condition == DependencyCondition::Healthy
                        && !target.has_healthcheck() =>
                {
                    report.push(
                        Rule::UnhealthyDependency,
                        Some(name),
                        format!(
                            "Service '{}' waits for '{}' to be healthy but '{}' has no healthcheck",
                            name, dep.service, dep.service
                        ),
                    )
                }
                Some(_) => {}
            }
        }
    }

    fn check_mounts<'a>(
        &self,
        document: &'a Document,
        name: &str,
        service: &Service,
        used_volumes: &mut BTreeSet<&'a str>,
        report: &mut Report,
    ) {
        for mount in service.volumes.iter().flatten() {
            let mount = match parse_mount(mount) {
                Ok(mount) => mount,
                Err(e) => {
                    report.push(Rule::InvalidMount, Some(name), format!("Service '{}': {}", name, e));
                    continue;
                }
            };

            if let Some(volume) = mount.volume_name() {
                match document.volumes.get_key_value(volume) {
                    Some((declared, _)) => {
                        used_volumes.insert(declared.as_str());
                    }
                    None => report.push(
                        Rule::DanglingVolume,
                        Some(name),
                        format!("Service '{}' mounts undefined volume '{}'", name, volume),
                    ),
                }
            }
        }
    }

    fn check_ports(
        &self,
        name: &str,
        service: &Service,
        bindings: &mut BTreeMap<(u16, Protocol), Vec<Binding>>,
        report: &mut Report,
    ) {
        for port in service.ports.iter().flatten() {
            let mapping: PortMapping = match parse_port(port) {
                Ok(mapping) => mapping,
                Err(e) => {
                    report.push(Rule::InvalidPort, Some(name), format!("Service '{}': {}", name, e));
                    continue;
                }
            };

            let Some(published) = mapping.published else {
                continue;
            };

            for host_port in published.ports() {
                let binding = Binding {
                    service: name.to_string(),
                    host_ip: mapping.host_ip,
                };
                let taken = bindings.entry((host_port, mapping.protocol)).or_default();
                if let Some(other) = taken.iter().find(|b| b.overlaps(&binding)) {
                    report.push(
                        Rule::PortConflict,
                        Some(name),
                        format!(
                            "Service '{}' publishes {}/{} which is already published by '{}'",
                            name, host_port, mapping.protocol, other.service
                        ),
                    );
                }
                taken.push(binding);
            }
        }
    }

    fn check_networks(
        &self,
        document: &Document,
        name: &str,
        service: &Service,
        report: &mut Report,
    ) {
        for network in service.network_names() {
            if network != "default" && !document.networks.contains_key(network) {
                report.push(
                    Rule::UndefinedNetwork,
                    Some(name),
                    format!("Service '{}' references undefined network '{}'", name, network),
                );
            }
        }
    }

    fn check_env_files(&self, name: &str, service: &Service, report: &mut Report) {
        if !self.options.check_env_files {
            return;
        }
        let Some(base_dir) = &self.options.base_dir else {
            return;
        };

        for (path, required) in service.env_files() {
            if required && !base_dir.join(path).is_file() {
                report.push(
                    Rule::MissingEnvFile,
                    Some(name),
                    format!("Service '{}' references missing env file '{}'", name, path),
                );
            }
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationOptions::default())
    }
}

fn check_container_names(document: &Document, report: &mut Report) {
    let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, service) in &document.services {
        if let Some(container_name) = &service.container_name {
            owners.entry(container_name.as_str()).or_default().push(name.as_str());
        }
    }

    for (container_name, services) in owners {
        if services.len() > 1 {
            report.push(
                Rule::DuplicateContainerName,
                services.first().copied(),
                format!(
                    "Container name '{}' is used by services {}",
                    container_name,
                    services.join(", ")
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorParser;
    use crate::validate::finding::Severity;
    use tempfile::tempdir;

    const REFERENCE: &str = include_str!("../../demos/docker-compose.yml");

    fn validate(yaml: &str) -> Report {
        let doc = DescriptorParser::parse_str(yaml).unwrap();
        Validator::default().validate(&doc)
    }

    fn rules(report: &Report) -> Vec<Rule> {
        report.findings.iter().map(|f| f.rule).collect()
    }

    #[test]
    fn test_reference_descriptor_is_clean() {
        let report = validate(REFERENCE);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
        assert!(report.is_valid(true));
    }

    #[test]
    fn test_collects_every_dangling_reference() {
        let report = validate(
            r#"
services:
  backend:
    image: api
    container_name: backend
    depends_on: [database, cache]
    volumes:
      - static:/app/static
      - media:/app/media
"#,
        );
        assert_eq!(report.by_rule(Rule::DanglingDependency).count(), 2);
        assert_eq!(report.by_rule(Rule::DanglingVolume).count(), 2);
        assert!(!report.is_valid(false));
    }

    #[test]
    fn test_optional_dependency_is_not_dangling() {
        let report = validate(
            "services:\n  a:\n    image: x\n    container_name: a\n    depends_on:\n      ghost:\n        required: false\n",
        );
        assert!(report.findings.is_empty(), "{:?}", report.findings);
    }

    #[test]
    fn test_container_names() {
        let report = validate(
            r#"
services:
  a:
    image: x
    container_name: shared
  b:
    image: x
    container_name: shared
  c:
    image: x
"#,
        );
        let duplicate: Vec<_> = report.by_rule(Rule::DuplicateContainerName).collect();
        assert_eq!(duplicate.len(), 1);
        assert!(duplicate[0].message.contains("a, b"));

        let missing: Vec<_> = report.by_rule(Rule::MissingContainerName).collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].service.as_deref(), Some("c"));
        assert_eq!(missing[0].severity, Severity::Warning);
    }

    #[test]
    fn test_port_conflicts() {
        let report = validate(
            r#"
services:
  a:
    image: x
    container_name: a
    ports: ["80:80", "127.0.0.1:9000:9000", "53:53/udp"]
  b:
    image: x
    container_name: b
    ports: ["8080-8081:80-81", "127.0.0.2:9000:9000", "53:53"]
  c:
    image: x
    container_name: c
    ports: ["0.0.0.0:80:8000", "8081:81"]
"#,
        );
        let conflicts: Vec<_> = report.by_rule(Rule::PortConflict).collect();
        assert_eq!(conflicts.len(), 2, "{:?}", conflicts);
        assert!(conflicts.iter().all(|f| f.service.as_deref() == Some("c")));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let report = validate(
            r#"
services:
  -bad:
    container_name: bad
    restart: sometimes
    ports: ["99999:80"]
    volumes: ["data:relative"]
    depends_on:
      other:
        condition: whenever
  other:
    image: x
    container_name: other
"#,
        );
        let found = rules(&report);
        for rule in [
            Rule::InvalidServiceName,
            Rule::MissingImage,
            Rule::InvalidRestart,
            Rule::InvalidPort,
            Rule::InvalidMount,
            Rule::InvalidDependencyCondition,
        ] {
            assert!(found.contains(&rule), "missing {:?} in {:?}", rule, found);
        }
    }

    #[test]
    fn test_cycle_and_healthcheck() {
        let report = validate(
            r#"
services:
  a:
    image: x
    container_name: a
    depends_on:
      b:
        condition: service_healthy
  b:
    image: x
    container_name: b
    depends_on: [a]
"#,
        );
        let found = rules(&report);
        assert!(found.contains(&Rule::CircularDependency));
        assert!(found.contains(&Rule::UnhealthyDependency));
    }

    #[test]
    fn test_networks_and_unused_volumes() {
        let report = validate(
            r#"
services:
  a:
    image: x
    container_name: a
    networks: [default, front, back]
networks:
  back:
volumes:
  orphan:
"#,
        );
        let undefined: Vec<_> = report.by_rule(Rule::UndefinedNetwork).collect();
        assert_eq!(undefined.len(), 1);
        assert!(undefined[0].message.contains("front"));
        assert_eq!(report.by_rule(Rule::UnusedVolume).count(), 1);
        assert!(report.is_valid(false));
        assert!(!report.is_valid(true));

        let doc = DescriptorParser::parse_str("services: {}\nvolumes:\n  orphan:\n").unwrap();
        let quiet = Validator::new(ValidationOptions {
            warn_unused_volumes: false,
            ..Default::default()
        })
        .validate(&doc);
        assert!(quiet.findings.is_empty());
    }

    #[test]
    fn test_env_files_checked_against_base_dir() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(".env"), "POSTGRES_DB=foodgram\n").unwrap();
        let doc = DescriptorParser::parse_str(
            r#"
services:
  a:
    image: x
    container_name: a
    env_file:
      - .env
      - .env.local
      - path: .env.optional
        required: false
"#,
        )
        .unwrap();

        let report = Validator::new(ValidationOptions {
            base_dir: Some(temp.path().to_path_buf()),
            ..Default::default()
        })
        .validate(&doc);
        let missing: Vec<_> = report.by_rule(Rule::MissingEnvFile).collect();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].message.contains(".env.local"));

        // Without a base directory nothing is checked
        assert!(Validator::default().validate(&doc).findings.is_empty());
    }
}
