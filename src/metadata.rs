//! Tool manifest discovery.
//!
//! `GET {base}/api/sessions/{code}/metadata` returns the tools the session
//! exposes to agents. An optional `Accept-Version` header requests a specific
//! API version; the relay answers `406` with the versions it supports when it
//! cannot honor it.

use crate::transport::RelayHttpClient;
use crate::types::{ParameterSchema, ToolSchema};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetadataError {
    #[error("Unauthorized: {message}")]
    Authentication { message: String },

    #[error("Forbidden: {message}")]
    SessionExpired { message: String },

    #[error("Unsupported version: {requested_version}")]
    VersionNotSupported {
        requested_version: String,
        supported_versions: Vec<String>,
    },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

impl MetadataError {
    /// Machine-readable code, where the relay defines one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            MetadataError::Authentication { .. } => Some("AUTHENTICATION_FAILED"),
            MetadataError::SessionExpired { .. } => Some("SESSION_EXPIRED"),
            MetadataError::VersionNotSupported { .. } => Some("VERSION_NOT_SUPPORTED"),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            MetadataError::Authentication { .. } => Some(401),
            MetadataError::SessionExpired { .. } => Some(403),
            MetadataError::VersionNotSupported { .. } => Some(406),
            MetadataError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_reply(status: u16, body: &str) -> Self {
        let data: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let message = data
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| (!body.trim().is_empty() && data.is_null()).then(|| body.trim().to_string()))
            .unwrap_or_else(|| format!("HTTP {} error", status));
        match status {
            401 => MetadataError::Authentication { message },
            403 => MetadataError::SessionExpired { message },
            406 => MetadataError::VersionNotSupported {
                requested_version: data
                    .get("requestedVersion")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                supported_versions: data
                    .get("supportedVersions")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default(),
            },
            _ => MetadataError::Http { status, message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

impl ManifestTool {
    /// Interpret `inputSchema` as a tool schema. A missing schema means the
    /// tool takes no declared parameters.
    pub fn to_tool_schema(&self) -> crate::Result<ToolSchema> {
        let parameters = match &self.input_schema {
            Some(schema) => serde_json::from_value::<ParameterSchema>(schema.clone())?,
            None => ParameterSchema::object(),
        };
        let schema = ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters,
        };
        schema.check()?;
        Ok(schema)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolManifest {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub tools: Vec<ManifestTool>,
}

impl ToolManifest {
    pub fn tool(&self, name: &str) -> Option<&ManifestTool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn to_tool_schemas(&self) -> crate::Result<Vec<ToolSchema>> {
        self.tools.iter().map(ManifestTool::to_tool_schema).collect()
    }
}

/// Version headers sent alongside a manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestVersions {
    pub api_version: Option<String>,
    pub tool_manifest_version: Option<String>,
    pub supported_versions: Vec<String>,
}

impl ManifestVersions {
    fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Self {
            api_version: get("api-version"),
            tool_manifest_version: get("tool-manifest-version"),
            supported_versions: get("supported-versions")
                .map(|s| {
                    s.split(',')
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

/// Outcome of requesting a specific API version.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionNegotiation {
    pub success: bool,
    pub version: Option<String>,
    pub error: Option<String>,
    pub requested_version: String,
    pub supported_versions: Vec<String>,
    pub manifest: Option<ToolManifest>,
}

pub struct MetadataClient {
    http: RelayHttpClient,
    session_code: String,
    timeout: Duration,
}

impl MetadataClient {
    pub fn new(http: RelayHttpClient, session_code: impl Into<String>) -> Self {
        Self {
            http,
            session_code: session_code.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch the manifest together with the version headers.
    pub async fn fetch(
        &self,
        api_version: Option<&str>,
    ) -> Result<(ToolManifest, ManifestVersions), MetadataError> {
        let url = self
            .http
            .metadata_url(&self.session_code)
            .map_err(|e| MetadataError::Network(e.to_string()))?;
        let mut req = self
            .http
            .inner()
            .get(url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout);
        if let Some(v) = api_version {
            req = req.header("accept-version", v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        let versions = ManifestVersions::from_headers(resp.headers());
        tracing::debug!(
            http_status = status,
            api_version = ?versions.api_version,
            tool_manifest_version = ?versions.tool_manifest_version,
            supported_versions = ?versions.supported_versions,
            "metadata reply"
        );
        let body = resp
            .text()
            .await
            .map_err(|e| MetadataError::Network(e.to_string()))?;
        if status != 200 {
            return Err(MetadataError::from_reply(status, &body));
        }
        let manifest = serde_json::from_str(&body)
            .map_err(|e| MetadataError::InvalidManifest(e.to_string()))?;
        Ok((manifest, versions))
    }

    pub async fn get_tool_manifest(
        &self,
        api_version: Option<&str>,
    ) -> Result<ToolManifest, MetadataError> {
        self.fetch(api_version).await.map(|(m, _)| m)
    }

    /// `false` both when the tool is absent and when the manifest cannot be
    /// fetched.
    pub async fn is_tool_available(&self, name: &str) -> bool {
        match self.get_tool_manifest(None).await {
            Ok(m) => m.tool(name).is_some(),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "could not check tool availability");
                false
            }
        }
    }

    pub async fn get_tool_schema(&self, name: &str) -> Option<Value> {
        match self.get_tool_manifest(None).await {
            Ok(m) => m.tool(name).and_then(|t| t.input_schema.clone()),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "could not fetch tool schema");
                None
            }
        }
    }

    pub async fn list_available_tools(&self) -> Vec<ToolSummary> {
        match self.get_tool_manifest(None).await {
            Ok(m) => m
                .tools
                .into_iter()
                .map(|t| ToolSummary {
                    name: t.name,
                    description: t.description,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "could not list tools");
                Vec::new()
            }
        }
    }

    /// Request `version`. An unsupported version is reported in the result;
    /// every other failure is an error.
    pub async fn negotiate_version(
        &self,
        version: &str,
    ) -> Result<VersionNegotiation, MetadataError> {
        match self.fetch(Some(version)).await {
            Ok((manifest, versions)) => Ok(VersionNegotiation {
                success: true,
                version: manifest.api_version.clone().or(versions.api_version),
                error: None,
                requested_version: version.to_string(),
                supported_versions: versions.supported_versions,
                manifest: Some(manifest),
            }),
            Err(MetadataError::VersionNotSupported {
                requested_version,
                supported_versions,
            }) => Ok(VersionNegotiation {
                success: false,
                version: None,
                error: Some(format!("Unsupported version: {}", requested_version)),
                requested_version,
                supported_versions,
                manifest: None,
            }),
            Err(e) => Err(e),
        }
    }
}
