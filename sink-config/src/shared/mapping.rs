use serde::{Deserialize, Serialize};

/// Roles granted `SELECT` on a target schema's tables.
///
/// Accepts either a single role name or a list of role names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectPermissions {
    One(String),
    Many(Vec<String>),
}

impl SelectPermissions {
    /// Returns the role names, skipping empty entries.
    pub fn roles(&self) -> Vec<String> {
        let roles = match self {
            SelectPermissions::One(role) => vec![role.clone()],
            SelectPermissions::Many(roles) => roles.clone(),
        };

        roles
            .into_iter()
            .map(|role| role.trim().to_string())
            .filter(|role| !role.is_empty())
            .collect()
    }
}

/// Where a source schema is written to in the destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMapping {
    /// Destination schema for streams of this source schema.
    pub target_schema: String,
    /// Roles granted `SELECT` on created tables, overriding the default.
    #[serde(default)]
    pub target_schema_select_permissions: Option<SelectPermissions>,
    /// Columns to index, keyed by table name. Every listed column gets its own index.
    #[serde(default)]
    pub indices: std::collections::HashMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_permissions_accept_string_or_list() {
        let one: SelectPermissions = serde_json::from_str(r#""reporting""#).unwrap();
        assert_eq!(one.roles(), vec!["reporting".to_string()]);

        let many: SelectPermissions = serde_json::from_str(r#"["a", " ", "b"]"#).unwrap();
        assert_eq!(many.roles(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn mapping_defaults_indices() {
        let mapping: SchemaMapping =
            serde_json::from_str(r#"{"target_schema": "analytics"}"#).unwrap();
        assert_eq!(mapping.target_schema, "analytics");
        assert!(mapping.indices.is_empty());
        assert!(mapping.target_schema_select_permissions.is_none());
    }
}
