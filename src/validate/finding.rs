//! Validation findings

use serde::Serialize;
use std::fmt;

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Rule that produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    DanglingDependency,
    DanglingVolume,
    CircularDependency,
    MissingImage,
    DuplicateContainerName,
    MissingContainerName,
    InvalidPort,
    InvalidMount,
    InvalidRestart,
    PortConflict,
    InvalidServiceName,
    InvalidDependencyCondition,
    UnhealthyDependency,
    UndefinedNetwork,
    UnusedVolume,
    MissingEnvFile,
}

impl Rule {
    /// Stable rule identifier
    pub fn code(&self) -> &'static str {
        match self {
            Rule::DanglingDependency => "dangling-dependency",
            Rule::DanglingVolume => "dangling-volume",
            Rule::CircularDependency => "circular-dependency",
            Rule::MissingImage => "missing-image",
            Rule::DuplicateContainerName => "duplicate-container-name",
            Rule::MissingContainerName => "missing-container-name",
            Rule::InvalidPort => "invalid-port",
            Rule::InvalidMount => "invalid-mount",
            Rule::InvalidRestart => "invalid-restart",
            Rule::PortConflict => "port-conflict",
            Rule::InvalidServiceName => "invalid-service-name",
            Rule::InvalidDependencyCondition => "invalid-dependency-condition",
            Rule::UnhealthyDependency => "unhealthy-dependency",
            Rule::UndefinedNetwork => "undefined-network",
            Rule::UnusedVolume => "unused-volume",
            Rule::MissingEnvFile => "missing-env-file",
        }
    }

    /// Severity this rule reports at
    pub fn severity(&self) -> Severity {
        match self {
            Rule::MissingContainerName
            | Rule::UnhealthyDependency
            | Rule::UndefinedNetwork
            | Rule::UnusedVolume
            | Rule::MissingEnvFile => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A single problem found in a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub rule: Rule,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.rule, self.message)
    }
}

/// Every finding for a document
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub findings: Vec<Finding>,
}

impl Report {
    /// Record a finding at the rule's severity
    pub fn push(&mut self, rule: Rule, service: Option<&str>, message: String) {
        self.findings.push(Finding {
            severity: rule.severity(),
            rule,
            service: service.map(str::to_string),
            message,
        });
    }

    /// Error-level findings
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    /// Warning-level findings
    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Warning)
    }

    /// Findings raised by a rule
    pub fn by_rule(&self, rule: Rule) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.rule == rule)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// No errors, and in strict mode no warnings either
    pub fn is_valid(&self, strict: bool) -> bool {
        self.error_count() == 0 && (!strict || self.warning_count() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_and_strictness() {
        let mut report = Report::default();
        assert!(report.is_valid(true));

        report.push(Rule::UnusedVolume, None, "Volume 'x' is never mounted".to_string());
        assert!(report.is_valid(false));
        assert!(!report.is_valid(true));

        report.push(Rule::DanglingVolume, Some("db"), "boom".to_string());
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.warning_count(), 1);
        assert!(!report.is_valid(false));
        assert_eq!(report.by_rule(Rule::DanglingVolume).count(), 1);
    }

    #[test]
    fn test_finding_serialization() {
        let mut report = Report::default();
        report.push(Rule::PortConflict, Some("nginx"), "port 80 taken".to_string());
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"rule\":\"port-conflict\""));
        assert!(json.contains("\"severity\":\"error\""));
        assert_eq!(
            report.findings[0].to_string(),
            "error[port-conflict]: port 80 taken"
        );
    }
}
