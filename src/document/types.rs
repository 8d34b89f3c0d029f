//! Common types for virtual documents

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_lsp::lsp_types::Url;

use crate::document::key::VirtualKey;
use crate::document::mapping;

/// A contiguous block of C code in the virtual document that originates from
/// one run of lines in the McCode source. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    /// Section name, e.g. `declare` or `trace` (best-effort, may be empty)
    #[serde(default)]
    pub section: String,
    /// Human-readable label, e.g. `EXTEND first` (best-effort, may be empty)
    #[serde(default)]
    pub label: String,
    /// First source line of the region
    pub mccode_line: u32,
    /// First virtual line of the region
    pub virtual_line: u32,
    /// Number of lines in the region
    pub content_lines: u32,
}

/// Latest derived content for one source document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDocument {
    pub key: VirtualKey,
    pub source_uri: Url,
    pub content: String,
    /// Materialized copy of the content on disk, owned by the server
    pub temp_path: Option<PathBuf>,
    pub regions: Vec<Region>,
}

impl VirtualDocument {
    /// Map a source (line, col) to the virtual document, if it falls in a C region
    pub fn source_to_virtual(&self, line: u32, col: u32) -> Option<(u32, u32)> {
        mapping::source_to_virtual(&self.regions, line, col)
    }

    /// Map a virtual (line, col) back to the source document
    pub fn virtual_to_source(&self, line: u32, col: u32) -> Option<(u32, u32)> {
        mapping::virtual_to_source(&self.regions, line, col)
    }
}

/// Refresh result shared by pull responses and push notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    /// Source document URI, when the server reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<Region>,
}

/// Reasons a refresh payload cannot be applied
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Empty content for {0}")]
    EmptyContent(String),

    #[error("Missing virtual URI")]
    MissingVirtualUri,

    #[error("Invalid virtual URI: {0}")]
    InvalidVirtualUri(String),
}

impl RefreshPayload {
    /// Convert the payload into a cacheable document.
    ///
    /// An absent or empty `content` is "no result", not a document.
    pub fn into_document(self) -> Result<VirtualDocument, PayloadError> {
        let virtual_uri = self.virtual_uri.ok_or(PayloadError::MissingVirtualUri)?;
        let key = VirtualKey::from_virtual_uri(&virtual_uri)
            .ok_or_else(|| PayloadError::InvalidVirtualUri(virtual_uri.clone()))?;

        let content = match self.content {
            Some(content) if !content.is_empty() => content,
            _ => return Err(PayloadError::EmptyContent(virtual_uri)),
        };

        let source_uri = self
            .uri
            .as_deref()
            .and_then(|uri| Url::parse(uri).ok())
            .or_else(|| key.source_uri())
            .ok_or_else(|| PayloadError::InvalidVirtualUri(virtual_uri.clone()))?;

        Ok(VirtualDocument {
            key,
            source_uri,
            content,
            temp_path: self.temp_path,
            regions: self.regions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_deserializes_server_response_shape() {
        let payload: RefreshPayload = serde_json::from_value(json!({
            "uri": "file:///sim/foo.instr",
            "virtualUri": "mccode-c:///sim/foo.instr.c",
            "content": "int main(void) { return 0; }\n",
            "tempPath": "/tmp/mclsp_0123456789ab.c",
            "regions": [
                {
                    "section": "declare",
                    "label": "DECLARE",
                    "mccodeTokenLine": 2,
                    "mccodeLine": 3,
                    "virtualLine": 120,
                    "contentLines": 2
                }
            ]
        }))
        .unwrap();

        let doc = payload.into_document().unwrap();

        assert_eq!(doc.key.as_str(), "mc-virtual:///sim/foo.instr.c");
        assert_eq!(doc.source_uri.as_str(), "file:///sim/foo.instr");
        assert_eq!(
            doc.temp_path,
            Some(PathBuf::from("/tmp/mclsp_0123456789ab.c"))
        );
        assert_eq!(doc.regions.len(), 1);
        assert_eq!(doc.regions[0].virtual_line, 120);
    }

    #[test]
    fn payload_without_source_uri_derives_it_from_key() {
        let payload = RefreshPayload {
            virtual_uri: Some("mc-virtual:///sim/bar.comp.c".to_string()),
            content: Some("/* c */".to_string()),
            ..Default::default()
        };

        let doc = payload.into_document().unwrap();

        assert_eq!(doc.source_uri.as_str(), "file:///sim/bar.comp");
        assert_eq!(doc.temp_path, None);
    }

    #[test]
    fn payload_with_empty_content_is_no_result() {
        let payload = RefreshPayload {
            virtual_uri: Some("mc-virtual:///sim/bar.comp.c".to_string()),
            content: Some(String::new()),
            ..Default::default()
        };

        assert_eq!(
            payload.into_document(),
            Err(PayloadError::EmptyContent(
                "mc-virtual:///sim/bar.comp.c".to_string()
            ))
        );
    }

    #[test]
    fn payload_without_content_is_no_result() {
        let payload = RefreshPayload {
            virtual_uri: Some("mc-virtual:///sim/bar.comp.c".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            payload.into_document(),
            Err(PayloadError::EmptyContent(_))
        ));
    }

    #[test]
    fn payload_without_virtual_uri_is_rejected() {
        let payload = RefreshPayload {
            content: Some("/* c */".to_string()),
            ..Default::default()
        };

        assert_eq!(
            payload.into_document(),
            Err(PayloadError::MissingVirtualUri)
        );
    }
}
