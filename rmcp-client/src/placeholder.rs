//! Late resolution of `$VAR`-style placeholders in header and env values.
//!
//! Supported forms: `$VAR`, `$env:VAR`, `${VAR}`, `${VAR:-default}`.
//! Resolution happens at transport-creation time; malformed placeholders are
//! rejected rather than passed through.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaceholderError {
    #[error("unterminated placeholder `${{` in `{0}`")]
    Unterminated(String),
    #[error("malformed placeholder `$` in `{0}`")]
    Malformed(String),
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Resolve every placeholder in `value` against `lookup`. Unset variables
/// resolve to the empty string (or their `:-` default when given).
pub fn resolve_value(
    value: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, PlaceholderError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some((start, '{')) => {
                let start = *start;
                chars.next();
                let rest = &value[start + 1..];
                let Some(end) = rest.find('}') else {
                    return Err(PlaceholderError::Unterminated(value.to_string()));
                };
                let body = &rest[..end];
                let (name, default) = match body.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (body, None),
                };
                if name.is_empty() || !name.chars().all(is_var_char) {
                    return Err(PlaceholderError::Malformed(value.to_string()));
                }
                match lookup(name) {
                    Some(resolved) if !resolved.is_empty() => out.push_str(&resolved),
                    _ => out.push_str(default.unwrap_or("")),
                }
                while let Some((_, consumed)) = chars.next() {
                    if consumed == '}' {
                        break;
                    }
                }
            }
            Some((_, c2)) if is_var_char(*c2) => {
                let mut name = String::new();
                while let Some((_, c2)) = chars.peek() {
                    if is_var_char(*c2) {
                        name.push(*c2);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // `$env:VAR` is the PowerShell spelling of the same thing.
                if name == "env" && matches!(chars.peek(), Some((_, ':'))) {
                    chars.next();
                    let mut env_name = String::new();
                    while let Some((_, c2)) = chars.peek() {
                        if is_var_char(*c2) {
                            env_name.push(*c2);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if env_name.is_empty() {
                        return Err(PlaceholderError::Malformed(value.to_string()));
                    }
                    out.push_str(&lookup(&env_name).unwrap_or_default());
                } else {
                    out.push_str(&lookup(&name).unwrap_or_default());
                }
            }
            _ => return Err(PlaceholderError::Malformed(value.to_string())),
        }
    }

    Ok(out)
}

/// Resolve a whole map of values, dropping entries that resolve blank.
pub fn resolve_map(
    values: &HashMap<String, String>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<HashMap<String, String>, PlaceholderError> {
    let mut resolved = HashMap::with_capacity(values.len());
    for (key, value) in values {
        let value = resolve_value(value, lookup)?;
        if value.trim().is_empty() {
            continue;
        }
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

/// Resolve against the process environment.
pub fn resolve_env_map(
    values: &HashMap<String, String>,
) -> Result<HashMap<String, String>, PlaceholderError> {
    resolve_map(values, &|name| std::env::var(name).ok())
}
