//! Deployment descriptor parser

use super::interpolate::interpolate_value;
use super::model::{
    DependsOnCondition, DependsOnConfig, Document, EnvFileConfig, EnvFileEntry,
    EnvironmentConfig, LabelsConfig, ScalarValue, Service, VolumeMount,
};
use super::mount::parse_mount;
use crate::error::{BerthError, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Default descriptor file names, in lookup order
pub const DEFAULT_DESCRIPTOR_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Descriptor parser
pub struct DescriptorParser;

impl DescriptorParser {
    /// Find the descriptor file in a directory
    pub fn find_descriptor(dir: &Path) -> Option<PathBuf> {
        DEFAULT_DESCRIPTOR_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Parse a descriptor file without interpolation
    pub fn parse_file(path: &Path) -> Result<Document> {
        let content = read(path)?;
        Self::parse_str(&content)
    }

    /// Parse a descriptor file, substituting variables from `env`
    pub fn parse_file_with_env(path: &Path, env: &HashMap<String, String>) -> Result<Document> {
        let content = read(path)?;
        Self::parse_str_with_env(&content, env)
    }

    /// Parse a descriptor from a string without interpolation
    pub fn parse_str(content: &str) -> Result<Document> {
        let value = Self::parse_value(content)?;
        Self::from_value(value)
    }

    /// Parse a descriptor from a string, substituting variables from `env`
    pub fn parse_str_with_env(content: &str, env: &HashMap<String, String>) -> Result<Document> {
        let mut value = Self::parse_value(content)?;
        interpolate_value(&mut value, env)?;
        Self::from_value(value)
    }

    /// Parse several descriptor files and merge them left to right
    ///
    /// Later files overlay earlier ones. When `env` is given every file is
    /// interpolated before merging.
    pub fn parse_files(paths: &[PathBuf], env: Option<&HashMap<String, String>>) -> Result<Document> {
        let mut paths = paths.iter();
        let first = paths
            .next()
            .ok_or_else(|| BerthError::InvalidConfig("no descriptor files given".to_string()))?;

        let load = |path: &Path| match env {
            Some(env) => Self::parse_file_with_env(path, env),
            None => Self::parse_file(path),
        };

        let mut document = load(first.as_path())?;
        for path in paths {
            tracing::debug!("Merging descriptor {}", path.display());
            let overlay = load(path.as_path())?;
            document = Self::merge_documents(document, overlay);
        }

        Ok(document)
    }

    /// Serialize a descriptor to canonical YAML
    pub fn to_yaml(document: &Document) -> Result<String> {
        Ok(serde_yaml::to_string(document)?)
    }

    /// Merge two descriptors; `overlay` wins on conflicts
    pub fn merge_documents(base: Document, overlay: Document) -> Document {
        let mut result = base;

        if overlay.version.is_some() {
            result.version = overlay.version;
        }
        if overlay.name.is_some() {
            result.name = overlay.name;
        }

        for (name, service) in overlay.services {
            match result.services.get_mut(&name) {
                Some(existing) => merge_service(existing, service),
                None => {
                    result.services.insert(name, service);
                }
            }
        }

        for (name, volume) in overlay.volumes {
            if volume.is_some() || !result.volumes.contains_key(&name) {
                result.volumes.insert(name, volume);
            }
        }

        for (name, network) in overlay.networks {
            if network.is_some() || !result.networks.contains_key(&name) {
                result.networks.insert(name, network);
            }
        }

        result.extensions.extend(overlay.extensions);

        result
    }

    fn parse_value(content: &str) -> Result<serde_yaml::Value> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| BerthError::Parse(format!("Failed to parse YAML: {}", e)))?;
        if value.is_null() {
            return Err(BerthError::Parse("descriptor is empty".to_string()));
        }
        // `<<: *anchor` keys are resolved before interpolation and typing
        value
            .apply_merge()
            .map_err(|e| BerthError::Parse(format!("Invalid merge key: {}", e)))?;
        Ok(value)
    }

    fn from_value(value: serde_yaml::Value) -> Result<Document> {
        serde_yaml::from_value(value)
            .map_err(|e| BerthError::Parse(format!("Invalid descriptor: {}", e)))
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        BerthError::Parse(format!("Failed to read {}: {}", path.display(), e))
    })
}

/// Merge one service record into another
fn merge_service(existing: &mut Service, overlay: Service) {
    macro_rules! overlay_wins {
        ($($field:ident),*) => {
            $(
                if overlay.$field.is_some() {
                    existing.$field = overlay.$field;
                }
            )*
        };
    }

    overlay_wins!(
        image,
        build,
        container_name,
        hostname,
        restart,
        command,
        entrypoint,
        networks,
        healthcheck,
        working_dir,
        user,
        profiles
    );

    if let Some(ports) = overlay.ports {
        let merged = existing.ports.get_or_insert_with(Vec::new);
        for port in ports {
            if !merged.contains(&port) {
                merged.push(port);
            }
        }
    }

    if let Some(volumes) = overlay.volumes {
        let merged = existing.volumes.get_or_insert_with(Vec::new);
        for mount in volumes {
            let target = mount_target(&mount);
            match merged.iter().position(|m| mount_target(m) == target) {
                Some(index) => merged[index] = mount,
                None => merged.push(mount),
            }
        }
    }

    existing.environment = match (existing.environment.take(), overlay.environment) {
        (Some(base), Some(over)) => Some(merge_environment(&base, &over)),
        (base, over) => over.or(base),
    };

    existing.labels = match (existing.labels.take(), overlay.labels) {
        (Some(base), Some(over)) => {
            let mut map = base.to_map();
            map.extend(over.to_map());
            Some(LabelsConfig::Map(
                map.into_iter()
                    .map(|(k, v)| (k, ScalarValue::String(v)))
                    .collect(),
            ))
        }
        (base, over) => over.or(base),
    };

    existing.depends_on = match (existing.depends_on.take(), overlay.depends_on) {
        (Some(base), Some(over)) => Some(merge_depends_on(base, over)),
        (base, over) => over.or(base),
    };

    existing.env_file = match (existing.env_file.take(), overlay.env_file) {
        (Some(base), Some(over)) => {
            let mut entries = env_file_entries(base);
            for entry in env_file_entries(over) {
                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
            Some(EnvFileConfig::Multiple(entries))
        }
        (base, over) => over.or(base),
    };

    existing.extensions.extend(overlay.extensions);
}

fn mount_target(mount: &VolumeMount) -> String {
    match parse_mount(mount) {
        Ok(parsed) => parsed.target,
        Err(_) => match mount {
            VolumeMount::Short(spec) => spec.clone(),
            VolumeMount::Long(long) => long.target.clone(),
        },
    }
}

fn merge_environment(base: &EnvironmentConfig, overlay: &EnvironmentConfig) -> EnvironmentConfig {
    let mut map = base.to_map();
    map.extend(overlay.to_map());
    EnvironmentConfig::Map(
        map.into_iter()
            .map(|(k, v)| (k, v.map(ScalarValue::String)))
            .collect(),
    )
}

fn merge_depends_on(base: DependsOnConfig, overlay: DependsOnConfig) -> DependsOnConfig {
    match (base, overlay) {
        (DependsOnConfig::Array(mut base), DependsOnConfig::Array(over)) => {
            for name in over {
                if !base.contains(&name) {
                    base.push(name);
                }
            }
            DependsOnConfig::Array(base)
        }
        (base, over) => {
            let mut map = depends_on_map(base);
            map.extend(depends_on_map(over));
            DependsOnConfig::Map(map)
        }
    }
}

fn depends_on_map(config: DependsOnConfig) -> BTreeMap<String, DependsOnCondition> {
    match config {
        DependsOnConfig::Array(arr) => arr
            .into_iter()
            .map(|name| (name, DependsOnCondition::default()))
            .collect(),
        DependsOnConfig::Map(map) => map,
    }
}

fn env_file_entries(config: EnvFileConfig) -> Vec<EnvFileEntry> {
    match config {
        EnvFileConfig::Single(path) => vec![EnvFileEntry::Path(path)],
        EnvFileConfig::Multiple(entries) => entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::model::{BuildConfig, PortConfig};
    use tempfile::tempdir;

    const REFERENCE: &str = include_str!("../../demos/docker-compose.yml");

    #[test]
    fn test_parse_reference_descriptor() {
        let doc = DescriptorParser::parse_str(REFERENCE).unwrap();
        assert_eq!(doc.services.len(), 4);
        for name in ["db", "backend", "frontend", "nginx"] {
            assert!(doc.services.contains_key(name), "missing {}", name);
        }
        assert!(doc.declares_volume("pg_data"));
        assert_eq!(doc.services["nginx"].dependency_names(), vec!["backend", "frontend"]);
    }

    #[test]
    fn test_round_trip_is_idempotent() {
        let doc = DescriptorParser::parse_str(REFERENCE).unwrap();
        let first = DescriptorParser::to_yaml(&doc).unwrap();
        let reparsed = DescriptorParser::parse_str(&first).unwrap();
        assert_eq!(doc, reparsed);
        let second = DescriptorParser::to_yaml(&reparsed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            DescriptorParser::parse_str(""),
            Err(BerthError::Parse(_))
        ));
        assert!(matches!(
            DescriptorParser::parse_str("services: [unclosed"),
            Err(BerthError::Parse(_))
        ));
        assert!(matches!(
            DescriptorParser::parse_str("services:\n  web:\n    ports: 80\n"),
            Err(BerthError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_with_env() {
        let mut env = HashMap::new();
        env.insert("TAG".to_string(), "v2".to_string());
        let doc = DescriptorParser::parse_str_with_env(
            "services:\n  web:\n    image: nginx:${TAG}\n    ports: [\"${PORT:-8000}:80\"]\n",
            &env,
        )
        .unwrap();
        assert_eq!(doc.services["web"].image.as_deref(), Some("nginx:v2"));
        assert_eq!(
            doc.services["web"].ports,
            Some(vec![PortConfig::Short("8000:80".to_string())])
        );
    }

    #[test]
    fn test_find_descriptor() {
        let temp = tempdir().unwrap();
        assert!(DescriptorParser::find_descriptor(temp.path()).is_none());

        std::fs::write(temp.path().join("docker-compose.yml"), REFERENCE).unwrap();
        std::fs::write(temp.path().join("compose.yaml"), REFERENCE).unwrap();
        let found = DescriptorParser::find_descriptor(temp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "compose.yaml");
    }

    #[test]
    fn test_parse_files_merges_overlay() {
        let temp = tempdir().unwrap();
        let base = temp.path().join("compose.yaml");
        let overlay = temp.path().join("compose.override.yaml");
        std::fs::write(&base, REFERENCE).unwrap();
        std::fs::write(
            &overlay,
            r#"
services:
  backend:
    image: example/backend:dev
    ports:
      - "8000:8000"
    volumes:
      - ./backend:/app/static/
    environment:
      DEBUG: "1"
  nginx:
    depends_on:
      db:
        condition: service_healthy
"#,
        )
        .unwrap();

        let doc = DescriptorParser::parse_files(&[base, overlay], None).unwrap();
        let backend = &doc.services["backend"];
        assert_eq!(backend.image.as_deref(), Some("example/backend:dev"));
        assert_eq!(backend.ports.as_ref().unwrap().len(), 1);
        let mounts = backend.volumes.as_ref().unwrap();
        assert!(mounts.contains(&VolumeMount::Short("./backend:/app/static/".to_string())));
        assert!(!mounts.contains(&VolumeMount::Short("static_value:/app/static/".to_string())));
        assert_eq!(
            backend.environment.as_ref().unwrap().to_map()["DEBUG"],
            Some("1".to_string())
        );
        assert_eq!(
            doc.services["nginx"].dependency_names(),
            vec!["backend", "db", "frontend"]
        );
        // Untouched fields survive
        assert_eq!(backend.restart.as_deref(), Some("always"));
    }

    #[test]
    fn test_nested_unknown_keys_survive_round_trip() {
        let yaml = r#"
services:
  api:
    build:
      context: .
      cache_from: [img:cache]
      args:
        - VERSION=1
    ports:
      - target: 8000
        published: "8000"
        app_protocol: http
    volumes:
      - type: bind
        source: ./src
        target: /src
        bind:
          create_host_path: true
          recursive: enabled
networks:
  back:
    ipam:
      config:
        - subnet: 172.28.0.0/16
volumes:
  data:
    driver_opts:
      type: none
"#;
        let doc = DescriptorParser::parse_str(yaml).unwrap();
        let output = DescriptorParser::to_yaml(&doc).unwrap();
        for key in ["cache_from", "app_protocol", "recursive", "ipam", "subnet"] {
            assert!(output.contains(key), "{} dropped from:\n{}", key, output);
        }
        assert_eq!(DescriptorParser::parse_str(&output).unwrap(), doc);

        match &doc.services["api"].build {
            Some(BuildConfig::Full(build)) => {
                let args = build.args.as_ref().unwrap().to_map();
                assert_eq!(args["VERSION"], Some("1".to_string()));
            }
            other => panic!("expected full build record, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_keys_are_applied() {
        let yaml = r#"
x-defaults: &defaults
  image: nginx
  restart: always
services:
  web:
    <<: *defaults
    container_name: web
  worker:
    <<: *defaults
    restart: on-failure
"#;
        let doc = DescriptorParser::parse_str(yaml).unwrap();
        let web = &doc.services["web"];
        assert_eq!(web.image.as_deref(), Some("nginx"));
        assert_eq!(web.restart.as_deref(), Some("always"));
        assert!(!web.extensions.contains_key("<<"));
        assert_eq!(doc.services["worker"].restart.as_deref(), Some("on-failure"));
    }

    #[test]
    fn test_parse_files_requires_input() {
        assert!(DescriptorParser::parse_files(&[], None).is_err());
    }

    #[test]
    fn test_merge_env_files_appends() {
        let base = DescriptorParser::parse_str("services:\n  a:\n    image: x\n    env_file: .env\n").unwrap();
        let over = DescriptorParser::parse_str("services:\n  a:\n    env_file: [.env, .env.local]\n").unwrap();
        let doc = DescriptorParser::merge_documents(base, over);
        let files: Vec<&str> = doc.services["a"].env_files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(files, vec![".env", ".env.local"]);
    }
}
