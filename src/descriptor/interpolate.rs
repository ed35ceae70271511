//! Environment variable interpolation
//!
//! Substitution runs over the raw YAML tree before it is typed, so every
//! string scalar in the descriptor is covered. Mapping keys are left alone.

use crate::error::{BerthError, Result};
use regex::{Captures, Regex};
use serde_yaml::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(\$)|\{([^}]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("placeholder pattern is valid")
});

static VARIABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*").expect("variable name pattern is valid")
});

/// Interpolate every string scalar inside a YAML value in place
pub fn interpolate_value(value: &mut Value, env: &HashMap<String, String>) -> Result<()> {
    match value {
        Value::String(s) => {
            if s.contains('$') {
                *s = interpolate_str(s, env)?;
            }
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                interpolate_value(item, env)?;
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate_value(item, env)?;
            }
        }
        Value::Tagged(tagged) => interpolate_value(&mut tagged.value, env)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

/// Interpolate `$VAR`, `${VAR}` and the `${VAR:-default}` family in a string
pub fn interpolate_str(s: &str, env: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(s) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&s[last..whole.start()]);
        out.push_str(&substitute(&caps, env)?);
        last = whole.end();
    }
    out.push_str(&s[last..]);

    Ok(out)
}

fn substitute(caps: &Captures<'_>, env: &HashMap<String, String>) -> Result<String> {
    if caps.get(1).is_some() {
        return Ok("$".to_string());
    }
    if let Some(name) = caps.get(3) {
        return Ok(lookup(name.as_str(), env));
    }

    let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let name = VARIABLE_NAME
        .find(body)
        .map(|m| m.as_str())
        .ok_or_else(|| BerthError::Interpolation(format!("invalid placeholder '${{{}}}'", body)))?;
    let rest = &body[name.len()..];
    let value = env.get(name);
    let is_set = value.is_some();
    let is_nonempty = value.map(|v| !v.is_empty()).unwrap_or(false);

    let (op, arg) = split_operator(rest).ok_or_else(|| {
        BerthError::Interpolation(format!("invalid placeholder '${{{}}}'", body))
    })?;

    let result = match op {
        "" => lookup(name, env),
        ":-" if is_nonempty => value.cloned().unwrap_or_default(),
        ":-" => arg.to_string(),
        "-" if is_set => value.cloned().unwrap_or_default(),
        "-" => arg.to_string(),
        ":+" if is_nonempty => arg.to_string(),
        "+" if is_set => arg.to_string(),
        ":+" | "+" => String::new(),
        ":?" if is_nonempty => value.cloned().unwrap_or_default(),
        "?" if is_set => value.cloned().unwrap_or_default(),
        _ => {
            let message = if arg.is_empty() {
                format!("required variable {} is missing a value", name)
            } else {
                format!("required variable {} is missing a value: {}", name, arg)
            };
            return Err(BerthError::Interpolation(message));
        }
    };

    Ok(result)
}

fn split_operator(rest: &str) -> Option<(&str, &str)> {
    if rest.is_empty() {
        return Some(("", ""));
    }
    [":-", ":+", ":?", "-", "+", "?"]
        .iter()
        .find(|op| rest.starts_with(**op))
        .map(|op| (*op, &rest[op.len()..]))
}

fn lookup(name: &str, env: &HashMap<String, String>) -> String {
    match env.get(name) {
        Some(value) => value.clone(),
        None => {
            tracing::warn!("The \"{}\" variable is not set. Defaulting to a blank string.", name);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("TAG".to_string(), "1.0.0".to_string());
        env.insert("EMPTY".to_string(), String::new());
        env
    }

    #[test]
    fn test_interpolate_plain_and_braced() {
        assert_eq!(interpolate_str("nginx:${TAG}", &env()).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate_str("nginx:$TAG", &env()).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate_str("nginx:$MISSING", &env()).unwrap(), "nginx:");
    }

    #[test]
    fn test_interpolate_defaults() {
        let env = env();
        assert_eq!(interpolate_str("${EMPTY:-x}", &env).unwrap(), "x");
        assert_eq!(interpolate_str("${EMPTY-x}", &env).unwrap(), "");
        assert_eq!(interpolate_str("${MISSING-x}", &env).unwrap(), "x");
        assert_eq!(interpolate_str("${TAG:-x}", &env).unwrap(), "1.0.0");
        assert_eq!(interpolate_str("${TAG:+set}", &env).unwrap(), "set");
        assert_eq!(interpolate_str("${EMPTY:+set}", &env).unwrap(), "");
    }

    #[test]
    fn test_interpolate_required() {
        let err = interpolate_str("${DB_PASSWORD:?set it}", &env()).unwrap_err();
        assert!(err.to_string().contains("DB_PASSWORD"));
        assert!(err.to_string().contains("set it"));
        assert!(interpolate_str("${EMPTY?}", &env()).is_ok());
        assert!(interpolate_str("${EMPTY:?}", &env()).is_err());
    }

    #[test]
    fn test_interpolate_escaped_dollar() {
        assert_eq!(interpolate_str("echo $$HOME", &env()).unwrap(), "echo $HOME");
    }

    #[test]
    fn test_interpolate_invalid_placeholder() {
        assert!(interpolate_str("${1ABC}", &env()).is_err());
        assert!(interpolate_str("${TAG/x}", &env()).is_err());
    }

    #[test]
    fn test_interpolate_value_tree() {
        let mut value: Value = serde_yaml::from_str(
            "services:\n  web:\n    image: nginx:${TAG}\n    ports: [\"${PORT:-80}:80\"]\n",
        )
        .unwrap();
        interpolate_value(&mut value, &env()).unwrap();
        assert_eq!(value["services"]["web"]["image"].as_str(), Some("nginx:1.0.0"));
        assert_eq!(value["services"]["web"]["ports"][0].as_str(), Some("80:80"));
    }
}
