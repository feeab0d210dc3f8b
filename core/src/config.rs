//! Loading of the `mcpServers` configuration document.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;

use crate::definition::DefinitionSource;
use crate::definition::RawServerEntry;
use crate::definition::ServerDefinition;
use crate::definition::SourceKind;

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    #[serde(default, alias = "mcpServers")]
    mcp_servers: HashMap<String, RawServerEntry>,
}

/// Parse a configuration document into definitions, sorted by name so
/// downstream listings are stable.
pub fn parse_config(json: &str, source: &DefinitionSource) -> Result<Vec<ServerDefinition>> {
    let document: ConfigDocument =
        serde_json::from_str(json).context("could not parse server configuration")?;

    let mut definitions = document
        .mcp_servers
        .into_iter()
        .map(|(name, raw)| {
            raw.into_definition::<serde_json::Error>(&name, source.clone())
                .map_err(|err| anyhow::anyhow!(err))
        })
        .collect::<Result<Vec<_>>>()?;
    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(definitions)
}

pub fn load_config_file(path: &Path) -> Result<Vec<ServerDefinition>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    let source = DefinitionSource {
        kind: SourceKind::Local,
        path: path.display().to_string(),
    };
    parse_config(&json, &source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::AuthScheme;
    use crate::definition::Lifecycle;
    use crate::definition::ServerCommand;
    use pretty_assertions::assert_eq;

    fn source() -> DefinitionSource {
        DefinitionSource::local("mcporter.json")
    }

    #[test]
    fn parses_stdio_and_http_servers() {
        let json = r#"{
            "mcpServers": {
                "echo": { "command": "node", "args": ["echo.js"], "env": { "KEY": "$VALUE" } },
                "remote": { "url": "https://mcp.example.com/mcp", "headers": { "X-Key": "abc" } }
            }
        }"#;
        let definitions = parse_config(json, &source()).expect("parses");
        assert_eq!(definitions.len(), 2);

        assert_eq!(definitions[0].name, "echo");
        match &definitions[0].command {
            ServerCommand::Stdio { exe, args, env, .. } => {
                assert_eq!(exe, "node");
                assert_eq!(args, &vec!["echo.js".to_string()]);
                assert_eq!(env.get("KEY"), Some(&"$VALUE".to_string()));
            }
            other => panic!("expected stdio command, got {other:?}"),
        }

        assert_eq!(definitions[1].name, "remote");
        assert!(definitions[1].command.is_http());
    }

    #[test]
    fn accepts_both_camel_and_snake_spellings() {
        let camel = r#"{
            "mcpServers": {
                "a": {
                    "url": "https://a.example/mcp",
                    "auth": "oauth",
                    "tokenCacheDir": "/tmp/cache",
                    "allowedTools": ["one"],
                    "resultMapping": { "getUser": { "pick": ["id"] } },
                    "lifecycle": { "mode": "keep-alive", "idleTimeoutMs": 5000 }
                }
            }
        }"#;
        let snake = r#"{
            "mcp_servers": {
                "a": {
                    "url": "https://a.example/mcp",
                    "auth": "oauth",
                    "token_cache_dir": "/tmp/cache",
                    "allowed_tools": ["one"],
                    "result_mapping": { "getUser": { "pick": ["id"] } },
                    "lifecycle": { "mode": "keep-alive", "idle_timeout_ms": 5000 }
                }
            }
        }"#;

        let from_camel = parse_config(camel, &source()).expect("camel parses");
        let from_snake = parse_config(snake, &source()).expect("snake parses");
        assert_eq!(from_camel, from_snake);

        let definition = &from_camel[0];
        assert_eq!(definition.auth, Some(AuthScheme::OAuth));
        assert_eq!(
            definition.lifecycle,
            Lifecycle::KeepAlive {
                idle_timeout_ms: Some(5000)
            }
        );
        assert_eq!(
            definition.result_mapping.get("getUser").map(|m| m.pick.clone()),
            Some(vec!["id".to_string()])
        );
    }

    #[test]
    fn rejects_entries_with_both_url_and_command() {
        let json = r#"{
            "mcpServers": {
                "broken": { "url": "https://a.example", "command": "node" }
            }
        }"#;
        let error = parse_config(json, &source()).expect_err("must reject");
        assert!(error.to_string().contains("not both"));
    }

    #[test]
    fn rejects_unknown_auth_scheme() {
        let json = r#"{
            "mcpServers": {
                "broken": { "url": "https://a.example", "auth": "basic" }
            }
        }"#;
        let error = parse_config(json, &source()).expect_err("must reject");
        assert!(error.to_string().contains("unknown auth scheme"));
    }

    #[test]
    fn ephemeral_lifecycle_round_trips() {
        let json = r#"{
            "mcpServers": {
                "short": { "command": "tool", "lifecycle": { "mode": "ephemeral" } }
            }
        }"#;
        let definitions = parse_config(json, &source()).expect("parses");
        assert_eq!(definitions[0].lifecycle, Lifecycle::Ephemeral);
    }
}
