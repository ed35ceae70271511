//! Volume mount interpretation
//!
//! Turns the short (`source:target:options`) and long mount syntaxes into a
//! single [`Mount`] value so callers can tell named volumes, bind mounts and
//! anonymous volumes apart.

use super::model::{VolumeMount, VolumeMountLong};
use crate::error::{BerthError, Result};
use serde::Serialize;
use std::fmt;

/// Kind of mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Named volume declared at the top level
    Volume,
    /// Anonymous volume (no source)
    Anonymous,
    /// Host path bind mount
    Bind,
    /// In-memory filesystem
    Tmpfs,
    /// Windows named pipe
    Npipe,
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountKind::Volume => write!(f, "volume"),
            MountKind::Anonymous => write!(f, "anonymous"),
            MountKind::Bind => write!(f, "bind"),
            MountKind::Tmpfs => write!(f, "tmpfs"),
            MountKind::Npipe => write!(f, "npipe"),
        }
    }
}

/// Interpreted volume mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    /// Mount kind
    pub kind: MountKind,
    /// Volume name or host path
    pub source: Option<String>,
    /// Absolute path inside the container
    pub target: String,
    /// Read only
    pub read_only: bool,
    /// Remaining mount options (propagation, selinux, consistency, nocopy)
    pub options: Vec<String>,
}

impl Mount {
    /// Named volume this mount refers to, if any
    pub fn volume_name(&self) -> Option<&str> {
        match self.kind {
            MountKind::Volume => self.source.as_deref(),
            _ => None,
        }
    }
}

const PROPAGATION: &[&str] = &["shared", "slave", "private", "rshared", "rslave", "rprivate"];
const CONSISTENCY: &[&str] = &["cached", "delegated", "consistent"];
const SELINUX: &[&str] = &["z", "Z"];

/// Interpret a mount in either syntax
pub fn parse_mount(mount: &VolumeMount) -> Result<Mount> {
    match mount {
        VolumeMount::Short(spec) => parse_short(spec),
        VolumeMount::Long(long) => parse_long(long),
    }
}

/// Interpret the short syntax: `target`, `source:target` or `source:target:options`
pub fn parse_short(spec: &str) -> Result<Mount> {
    let parts: Vec<&str> = spec.split(':').collect();

    let (source, target, options) = match parts.as_slice() {
        [target] => (None, *target, None),
        [source, target] => (Some(*source), *target, None),
        [source, target, options] => (Some(*source), *target, Some(*options)),
        _ => return Err(BerthError::invalid_mount(spec, "too many ':' separators")),
    };

    if let Some(source) = source {
        if source.is_empty() {
            return Err(BerthError::invalid_mount(spec, "empty source"));
        }
    }
    check_target(spec, target)?;

    let kind = match source {
        None => MountKind::Anonymous,
        Some(source) if is_host_path(source) => MountKind::Bind,
        Some(_) => MountKind::Volume,
    };

    let mut read_only = false;
    let mut extra = Vec::new();
    if let Some(options) = options {
        for option in options.split(',') {
            match option {
                "ro" => read_only = true,
                "rw" => read_only = false,
                "nocopy" if kind != MountKind::Bind => extra.push(option.to_string()),
                o if PROPAGATION.contains(&o) || CONSISTENCY.contains(&o) || SELINUX.contains(&o) => {
                    extra.push(o.to_string())
                }
                other => {
                    return Err(BerthError::invalid_mount(
                        spec,
                        format!("unknown option '{}'", other),
                    ))
                }
            }
        }
    }

    Ok(Mount {
        kind,
        source: source.map(str::to_string),
        target: target.to_string(),
        read_only,
        options: extra,
    })
}

fn parse_long(long: &VolumeMountLong) -> Result<Mount> {
    let spec = format!(
        "{}:{}",
        long.source.as_deref().unwrap_or(""),
        long.target
    );
    check_target(&spec, &long.target)?;

    let source = long.source.clone().filter(|s| !s.is_empty());
    let kind = match long.mount_type.as_str() {
        "volume" if source.is_some() => MountKind::Volume,
        "volume" => MountKind::Anonymous,
        "bind" => MountKind::Bind,
        "tmpfs" => MountKind::Tmpfs,
        "npipe" => MountKind::Npipe,
        other => {
            return Err(BerthError::invalid_mount(
                &spec,
                format!("unknown mount type '{}'", other),
            ))
        }
    };

    match kind {
        MountKind::Bind | MountKind::Npipe if source.is_none() => {
            return Err(BerthError::invalid_mount(
                &spec,
                format!("{} mount requires a source", kind),
            ));
        }
        MountKind::Tmpfs if source.is_some() => {
            return Err(BerthError::invalid_mount(&spec, "tmpfs mount takes no source"));
        }
        _ => {}
    }

    let mut options = Vec::new();
    if let Some(bind) = &long.bind {
        if let Some(propagation) = &bind.propagation {
            if !PROPAGATION.contains(&propagation.as_str()) {
                return Err(BerthError::invalid_mount(
                    &spec,
                    format!("unknown propagation '{}'", propagation),
                ));
            }
            options.push(propagation.clone());
        }
        if let Some(selinux) = &bind.selinux {
            if !SELINUX.contains(&selinux.as_str()) {
                return Err(BerthError::invalid_mount(
                    &spec,
                    format!("unknown selinux label '{}'", selinux),
                ));
            }
            options.push(selinux.clone());
        }
    }
    if long.volume.as_ref().and_then(|v| v.nocopy).unwrap_or(false) {
        options.push("nocopy".to_string());
    }
    if let Some(consistency) = &long.consistency {
        if !CONSISTENCY.contains(&consistency.as_str()) {
            return Err(BerthError::invalid_mount(
                &spec,
                format!("unknown consistency '{}'", consistency),
            ));
        }
        options.push(consistency.clone());
    }

    Ok(Mount {
        kind,
        source,
        target: long.target.clone(),
        read_only: long.read_only.unwrap_or(false),
        options,
    })
}

fn check_target(spec: &str, target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(BerthError::invalid_mount(spec, "empty container path"));
    }
    if !target.starts_with('/') {
        return Err(BerthError::invalid_mount(
            spec,
            format!("container path '{}' is not absolute", target),
        ));
    }
    Ok(())
}

fn is_host_path(source: &str) -> bool {
    source.starts_with('/') || source.starts_with('.') || source.starts_with('~')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::model::BindOptions;

    #[test]
    fn test_named_volume() {
        let mount = parse_short("pg_data:/var/lib/postgresql/data").unwrap();
        assert_eq!(mount.kind, MountKind::Volume);
        assert_eq!(mount.volume_name(), Some("pg_data"));
        assert!(!mount.read_only);
    }

    #[test]
    fn test_bind_mount_read_only() {
        let mount = parse_short("./nginx.conf:/etc/nginx/conf.d/default.conf:ro").unwrap();
        assert_eq!(mount.kind, MountKind::Bind);
        assert_eq!(mount.volume_name(), None);
        assert!(mount.read_only);

        let mount = parse_short("../frontend/build:/usr/share/nginx/html/").unwrap();
        assert_eq!(mount.kind, MountKind::Bind);
    }

    #[test]
    fn test_anonymous_volume() {
        let mount = parse_short("/app/node_modules").unwrap();
        assert_eq!(mount.kind, MountKind::Anonymous);
        assert_eq!(mount.source, None);
    }

    #[test]
    fn test_short_syntax_errors() {
        assert!(parse_short("data:relative/path").is_err());
        assert!(parse_short("data:").is_err());
        assert!(parse_short(":/data").is_err());
        assert!(parse_short("data:/data:bogus").is_err());
        assert!(parse_short("a:/b:ro:extra").is_err());
    }

    #[test]
    fn test_short_syntax_options() {
        let mount = parse_short("static:/app/static:ro,nocopy").unwrap();
        assert!(mount.read_only);
        assert_eq!(mount.options, vec!["nocopy".to_string()]);

        let mount = parse_short("./src:/src:rw,z,cached").unwrap();
        assert!(!mount.read_only);
        assert_eq!(mount.options, vec!["z".to_string(), "cached".to_string()]);

        assert!(parse_short("./src:/src:nocopy").is_err());
    }

    #[test]
    fn test_long_syntax() {
        let long = VolumeMountLong {
            mount_type: "bind".to_string(),
            source: Some("./docs".to_string()),
            target: "/usr/share/nginx/html/api/docs".to_string(),
            read_only: Some(true),
            bind: Some(BindOptions {
                propagation: Some("rprivate".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mount = parse_mount(&VolumeMount::Long(long)).unwrap();
        assert_eq!(mount.kind, MountKind::Bind);
        assert!(mount.read_only);
        assert_eq!(mount.options, vec!["rprivate".to_string()]);
    }

    #[test]
    fn test_long_syntax_rules() {
        let bind_without_source = VolumeMountLong {
            mount_type: "bind".to_string(),
            target: "/data".to_string(),
            ..Default::default()
        };
        assert!(parse_long(&bind_without_source).is_err());

        let tmpfs_with_source = VolumeMountLong {
            mount_type: "tmpfs".to_string(),
            source: Some("x".to_string()),
            target: "/tmp".to_string(),
            ..Default::default()
        };
        assert!(parse_long(&tmpfs_with_source).is_err());

        let anonymous = VolumeMountLong {
            mount_type: "volume".to_string(),
            target: "/cache".to_string(),
            ..Default::default()
        };
        assert_eq!(parse_long(&anonymous).unwrap().kind, MountKind::Anonymous);

        let unknown = VolumeMountLong {
            mount_type: "nfs".to_string(),
            target: "/x".to_string(),
            ..Default::default()
        };
        assert!(parse_long(&unknown).is_err());

        let bad_selinux = VolumeMountLong {
            mount_type: "bind".to_string(),
            source: Some("./src".to_string()),
            target: "/src".to_string(),
            bind: Some(BindOptions {
                selinux: Some("q".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(parse_long(&bad_selinux).is_err());

        let bad_consistency = VolumeMountLong {
            mount_type: "bind".to_string(),
            source: Some("./src".to_string()),
            target: "/src".to_string(),
            consistency: Some("eventual".to_string()),
            ..Default::default()
        };
        assert!(parse_long(&bad_consistency).is_err());

        let labelled = VolumeMountLong {
            bind: Some(BindOptions {
                selinux: Some("Z".to_string()),
                ..Default::default()
            }),
            consistency: Some("delegated".to_string()),
            ..bad_consistency
        };
        assert_eq!(
            parse_long(&labelled).unwrap().options,
            vec!["Z".to_string(), "delegated".to_string()]
        );
    }
}
