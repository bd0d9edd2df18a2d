//! Authentication policies and credential resolution for target nodes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ToolError;

pub const DEFAULT_SSH_PORT: u16 = 22;

const KEY_USERNAME: &str = "username";
const KEY_PASSWORD: &str = "password";
const KEY_PATH: &str = "keyPath";
const KEY_HOST: &str = "host";
const KEY_SSH_PORT: &str = "sshPort";

/// How credentials are resolved for a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthPolicy {
    /// No credentials; execute without an authentication context.
    #[default]
    #[serde(rename = "none")]
    None,
    /// One shared credential set for every node.
    #[serde(rename = "global")]
    Global,
    /// Node-specific credentials; unknown nodes are rejected.
    #[serde(rename = "perNode")]
    PerNode,
}

/// `authConfig` block of a tool family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub policy: AuthPolicy,
    #[serde(rename = "globalAuth", deserialize_with = "scalar_map")]
    pub global_auth: BTreeMap<String, String>,
    #[serde(rename = "nodeAuths", deserialize_with = "nested_scalar_map")]
    pub node_auths: BTreeMap<String, BTreeMap<String, String>>,
}

/// Credential values may be written as bare YAML/JSON scalars (`sshPort: 22`).
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Str(value) => value,
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Bool(value) => value.to_string(),
        }
    }
}

fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Scalar>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.into_string()))
        .collect())
}

fn nested_scalar_map<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, BTreeMap<String, Scalar>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(node, values)| {
            let values = values
                .into_iter()
                .map(|(key, value)| (key, value.into_string()))
                .collect();
            (node, values)
        })
        .collect())
}

/// Resolved credentials for one node. All fields are optional except the port.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_path: Option<String>,
    pub host: Option<String>,
    pub port: u16,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_path", &self.key_path.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl Credentials {
    /// Parse a flat credential mapping. Unknown keys are ignored.
    pub fn from_map(raw: &BTreeMap<String, String>) -> Result<Self, ToolError> {
        let port = match non_empty(raw, KEY_SSH_PORT) {
            Some(value) => value.trim().parse::<u16>().map_err(|err| {
                ToolError::Auth(format!("invalid {} '{}': {}", KEY_SSH_PORT, value, err))
            })?,
            None => DEFAULT_SSH_PORT,
        };
        Ok(Self {
            username: non_empty(raw, KEY_USERNAME),
            password: non_empty(raw, KEY_PASSWORD),
            key_path: non_empty(raw, KEY_PATH),
            host: non_empty(raw, KEY_HOST),
            port,
        })
    }

    /// Host to connect to; falls back to the node identifier.
    pub fn host_or<'a>(&'a self, node: &'a str) -> &'a str {
        self.host.as_deref().unwrap_or(node)
    }
}

fn non_empty(raw: &BTreeMap<String, String>, key: &str) -> Option<String> {
    raw.get(key).filter(|value| !value.is_empty()).cloned()
}

impl AuthConfig {
    /// Resolve credentials for `node` under this policy.
    ///
    /// Returns `None` for the `none` policy.
    pub fn resolve(&self, node: &str) -> Result<Option<Credentials>, ToolError> {
        match self.policy {
            AuthPolicy::None => Ok(None),
            AuthPolicy::Global => Credentials::from_map(&self.global_auth).map(Some),
            AuthPolicy::PerNode => {
                let raw = self.node_auths.get(node).ok_or_else(|| {
                    ToolError::Auth(format!("no credentials registered for node '{}'", node))
                })?;
                Credentials::from_map(raw).map(Some)
            }
        }
    }
}
