//! Restart policy

use crate::error::BerthError;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Container restart policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart
    #[default]
    No,
    /// Always restart
    Always,
    /// Restart on non-zero exit, optionally capped
    OnFailure(Option<u32>),
    /// Restart unless explicitly stopped
    UnlessStopped,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::No => write!(f, "no"),
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::OnFailure(None) => write!(f, "on-failure"),
            RestartPolicy::OnFailure(Some(n)) => write!(f, "on-failure:{}", n),
            RestartPolicy::UnlessStopped => write!(f, "unless-stopped"),
        }
    }
}

impl Serialize for RestartPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for RestartPolicy {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" | "" => Ok(RestartPolicy::No),
            "always" => Ok(RestartPolicy::Always),
            "unless-stopped" => Ok(RestartPolicy::UnlessStopped),
            "on-failure" => Ok(RestartPolicy::OnFailure(None)),
            other => match other.strip_prefix("on-failure:") {
                Some(n) => n
                    .parse::<u32>()
                    .map(|n| RestartPolicy::OnFailure(Some(n)))
                    .map_err(|_| BerthError::InvalidRestartPolicy(s.to_string())),
                None => Err(BerthError::InvalidRestartPolicy(s.to_string())),
            },
        }
    }
}
