//! Deployment descriptor types
//!
//! These records mirror the compose file format closely enough to
//! round-trip: every map is key-ordered, absent fields are omitted on
//! output, and keys this crate does not interpret are carried through
//! untouched in `extensions`.

use crate::error::{BerthError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Deployment descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Descriptor format version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ScalarValue>,
    /// Project name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Services
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    /// Named volumes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Option<VolumeConfig>>,
    /// Networks
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Option<NetworkConfig>>,
    /// Uninterpreted top-level keys (`x-*` extensions and the like)
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

impl Document {
    /// Look up a service by name
    pub fn service(&self, name: &str) -> Result<&Service> {
        self.services
            .get(name)
            .ok_or_else(|| BerthError::ServiceNotFound(name.to_string()))
    }

    /// Names of all declared services
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Names of all declared volumes
    pub fn volume_names(&self) -> impl Iterator<Item = &str> {
        self.volumes.keys().map(String::as_str)
    }

    /// Whether a top-level volume with this name exists
    pub fn declares_volume(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }
}

/// A scalar YAML value kept in its original type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Integer(i) => write!(f, "{}", i),
            ScalarValue::Float(x) => write!(f, "{}", x),
            ScalarValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::String(s.to_string())
    }
}

/// Service record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Build context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    /// Container name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Command to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandConfig>,
    /// Entrypoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandConfig>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentConfig>,
    /// Environment files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<EnvFileConfig>,
    /// Published ports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortConfig>>,
    /// Volume mounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeMount>>,
    /// Networks to connect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networks: Option<NetworksConfig>,
    /// Start-after dependencies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOnConfig>,
    /// Labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelsConfig>,
    /// Healthcheck
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthcheckConfig>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// User
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<String>>,
    /// Uninterpreted service keys
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

impl Service {
    /// Names of the services this one starts after, in declaration order
    pub fn dependency_names(&self) -> Vec<&str> {
        match &self.depends_on {
            Some(DependsOnConfig::Array(arr)) => arr.iter().map(String::as_str).collect(),
            Some(DependsOnConfig::Map(map)) => map.keys().map(String::as_str).collect(),
            None => Vec::new(),
        }
    }

    /// Names of the networks this service joins
    pub fn network_names(&self) -> Vec<&str> {
        match &self.networks {
            Some(NetworksConfig::Array(arr)) => arr.iter().map(String::as_str).collect(),
            Some(NetworksConfig::Map(map)) => map.keys().map(String::as_str).collect(),
            None => Vec::new(),
        }
    }

    /// Environment file references as `(path, required)` pairs
    pub fn env_files(&self) -> Vec<(&str, bool)> {
        match &self.env_file {
            Some(EnvFileConfig::Single(path)) => vec![(path.as_str(), true)],
            Some(EnvFileConfig::Multiple(entries)) => entries
                .iter()
                .map(|entry| match entry {
                    EnvFileEntry::Path(path) => (path.as_str(), true),
                    EnvFileEntry::Long(long) => {
                        (long.path.as_str(), long.required.unwrap_or(true))
                    }
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether a healthcheck is declared and not disabled
    pub fn has_healthcheck(&self) -> bool {
        self.healthcheck
            .as_ref()
            .map(|h| !h.disable.unwrap_or(false))
            .unwrap_or(false)
    }
}

/// Build configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildConfig {
    /// Context path only
    Simple(String),
    /// Full build configuration
    Full(BuildConfigFull),
}

/// Full build configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildConfigFull {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<EnvironmentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Command configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

/// Key/value pairs as a `KEY=value` list or a map
///
/// Used for `environment`, build `args` and `driver_opts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, Option<ScalarValue>>),
}

impl EnvironmentConfig {
    /// Flatten into a key/value map; keys without a value map to `None`
    pub fn to_map(&self) -> BTreeMap<String, Option<String>> {
        match self {
            EnvironmentConfig::Array(arr) => arr
                .iter()
                .map(|item| match item.split_once('=') {
                    Some((key, value)) => (key.to_string(), Some(value.to_string())),
                    None => (item.clone(), None),
                })
                .collect(),
            EnvironmentConfig::Map(map) => map
                .iter()
                .map(|(key, value)| (key.clone(), value.as_ref().map(|v| v.to_string())))
                .collect(),
        }
    }
}

/// Env file configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvFileConfig {
    /// Single file
    Single(String),
    /// Multiple files
    Multiple(Vec<EnvFileEntry>),
}

/// One entry of an env file list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvFileEntry {
    Path(String),
    Long(EnvFileLong),
}

/// Long env file entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvFileLong {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConfig {
    /// Bare container port: `80`
    Number(u32),
    /// Short syntax: "8080:80"
    Short(String),
    /// Long syntax
    Long(PortConfigLong),
}

/// Long port configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortConfigLong {
    /// Target port in container
    pub target: u32,
    /// Published port or range on host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<PublishedPort>,
    /// Host IP to bind to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    /// Protocol (tcp/udp/sctp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Mode (host/ingress)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Published port in long syntax
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublishedPort {
    Number(u32),
    Text(String),
}

impl fmt::Display for PublishedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishedPort::Number(n) => write!(f, "{}", n),
            PublishedPort::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Volume mount configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeMount {
    /// Short syntax: "source:target:mode"
    Short(String),
    /// Long syntax
    Long(VolumeMountLong),
}

/// Long volume mount configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMountLong {
    /// Mount type (volume, bind, tmpfs, npipe)
    #[serde(rename = "type")]
    pub mount_type: String,
    /// Source path or volume name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Target path in container
    pub target: String,
    /// Read only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    /// Bind options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<BindOptions>,
    /// Volume options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeOptions>,
    /// Tmpfs options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmpfs: Option<TmpfsOptions>,
    /// Consistency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Bind mount options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_host_path: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selinux: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Volume options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nocopy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Tmpfs options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TmpfsOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<ScalarValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Service networks configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworksConfig {
    /// Array of network names
    Array(Vec<String>),
    /// Map of network name to attachment options
    Map(BTreeMap<String, Option<ServiceNetworkConfig>>),
}

/// Per-service network attachment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceNetworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_address: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Depends on configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOnConfig {
    /// Array of service names
    Array(Vec<String>),
    /// Map of service to condition
    Map(BTreeMap<String, DependsOnCondition>),
}

/// Depends on condition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependsOnCondition {
    /// Condition to wait for; `service_started` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Restart this service when the dependency is updated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<bool>,
    /// Whether the dependency must exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Healthcheck configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthcheckConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<CommandConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable: Option<bool>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Labels configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelsConfig {
    /// Array of "key=value" strings
    Array(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, ScalarValue>),
}

impl LabelsConfig {
    /// Flatten into a key/value map
    pub fn to_map(&self) -> BTreeMap<String, String> {
        match self {
            LabelsConfig::Array(arr) => arr
                .iter()
                .map(|item| match item.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (item.clone(), String::new()),
                })
                .collect(),
            LabelsConfig::Map(map) => map
                .iter()
                .map(|(key, value)| (key.clone(), value.to_string()))
                .collect(),
        }
    }
}

/// Top-level volume record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_opts: Option<EnvironmentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// Top-level network record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_opts: Option<EnvironmentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

/// External resource marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalConfig {
    Bool(bool),
    Named { name: String },
}
