//! Wire schemas for the management API
//!
//! The upstream payloads are loosely typed: `auth_index` arrives as a string
//! or a number depending on the server version, the provider kind may sit
//! under `provider` or `type`, and disabled state is spelled either as a
//! boolean or as `status: "disabled"`. Everything here deserializes with
//! defaults so one malformed row never sinks a whole listing.

use serde::{Deserialize, Deserializer};

/// Response envelope of `GET /auth-files`.
#[derive(Debug, Default, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub files: Vec<AuthFileEntry>,
}

/// One row of the auth-file listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthFileEntry {
    #[serde(default, deserialize_with = "string_or_number")]
    pub auth_index: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub status: Option<String>,
}

impl AuthFileEntry {
    /// Lowercased provider kind, taken from `provider` and falling back to
    /// `type`.
    pub fn provider_kind(&self) -> String {
        self.provider
            .as_deref()
            .or(self.kind.as_deref())
            .unwrap_or_default()
            .to_lowercase()
    }

    /// Enabled unless the row says otherwise in either spelling.
    pub fn is_enabled(&self) -> bool {
        !(self.disabled || self.status.as_deref() == Some("disabled"))
    }

    /// A row is usable only with both an identity and a name.
    pub fn is_well_formed(&self) -> bool {
        !self.auth_index.trim().is_empty() && !self.name.trim().is_empty()
    }

    /// Informational label, if the listing carried an email.
    pub fn label(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }
}

/// Result of `POST /api-call`: the downstream response relayed by the
/// management server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeResponse {
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub body: String,
}

/// Accept a JSON string or number, yielding its string form.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) => s,
        Some(Raw::Int(n)) => n.to_string(),
        Some(Raw::Float(n)) => n.to_string(),
        None => String::new(),
    })
}
