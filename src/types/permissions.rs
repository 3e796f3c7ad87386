use serde::{Deserialize, Serialize};

/// Declared permissions document as stored in `.vault/permissions.json`.
///
/// All fields are optional on the wire; absence means "deny". Hashing always
/// covers the canonical encoding of the fully-populated normalized form, so
/// an empty document and an explicit deny-all document hash identically.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionsDocument {
    pub schema_version: String,
    #[serde(default)]
    pub declared: DeclaredPermissions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeclaredPermissions {
    #[serde(default)]
    pub filesystem: FilesystemDeclaration,
    #[serde(default)]
    pub network: NetworkDeclaration,
    #[serde(default)]
    pub exec: Vec<String>,
    #[serde(default)]
    pub agent_capabilities: AgentCapabilities,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesystemDeclaration {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
}

/// Wire form of the network declaration: `"none"`, `"all"`, or a host
/// allowlist. Validation of the mode string happens during normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum NetworkDeclaration {
    Mode(String),
    Allowlist(Vec<String>),
}

impl Default for NetworkDeclaration {
    fn default() -> Self {
        NetworkDeclaration::Mode("none".to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentCapabilities {
    #[serde(default)]
    pub memory_read: bool,
    #[serde(default)]
    pub memory_write: bool,
    #[serde(default)]
    pub spawn_agents: bool,
    #[serde(default)]
    pub modify_system_prompt: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_deny_all() {
        let doc: PermissionsDocument = serde_json::from_str(r#"{"schema_version": "1"}"#).unwrap();
        assert!(doc.declared.filesystem.read.is_empty());
        assert!(doc.declared.filesystem.write.is_empty());
        assert!(doc.declared.exec.is_empty());
        assert_eq!(doc.declared.network, NetworkDeclaration::Mode("none".into()));
        assert!(!doc.declared.agent_capabilities.memory_write);
    }

    #[test]
    fn test_network_mode_string() {
        let doc: DeclaredPermissions =
            serde_json::from_str(r#"{"network": "all"}"#).unwrap();
        assert_eq!(doc.network, NetworkDeclaration::Mode("all".into()));
    }

    #[test]
    fn test_network_allowlist() {
        let doc: DeclaredPermissions =
            serde_json::from_str(r#"{"network": ["api.example.com", "*.internal"]}"#).unwrap();
        assert_eq!(
            doc.network,
            NetworkDeclaration::Allowlist(vec![
                "api.example.com".to_string(),
                "*.internal".to_string()
            ])
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let doc = PermissionsDocument {
            schema_version: "1".to_string(),
            declared: DeclaredPermissions {
                filesystem: FilesystemDeclaration {
                    read: vec!["./data".to_string()],
                    write: vec![],
                },
                network: NetworkDeclaration::Mode("none".to_string()),
                exec: vec!["python3".to_string()],
                agent_capabilities: AgentCapabilities {
                    memory_read: true,
                    ..Default::default()
                },
            },
        };
        let json = serde_json::to_string_pretty(&doc).unwrap();
        let back: PermissionsDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }
}
