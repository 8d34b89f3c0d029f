//! Virtual key derivation
//!
//! Keys have the form `mc-virtual://<source-path>.c`. Both the client and the
//! server can compute them from the source path alone.

use std::fmt;

use tower_lsp::lsp_types::Url;

/// URI scheme of virtual documents
pub const VIRTUAL_SCHEME: &str = "mc-virtual";

/// Suffix appended to the source path
pub const VIRTUAL_SUFFIX: &str = ".c";

/// Source file extensions handled by the client
const MCCODE_EXTENSIONS: &[&str] = &[".instr", ".comp"];

/// Key of a virtual document in the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualKey(String);

impl VirtualKey {
    /// Derive the key for a source document
    pub fn for_source(uri: &Url) -> Self {
        Self(format!("{VIRTUAL_SCHEME}://{}{VIRTUAL_SUFFIX}", uri.path()))
    }

    /// Normalize a virtual URI reported by the server onto the client scheme.
    ///
    /// The server may use its own scheme (e.g. `mccode-c://`); only the path
    /// part is kept. Returns None if the URI has no `scheme://` prefix or an
    /// empty path.
    pub fn from_virtual_uri(virtual_uri: &str) -> Option<Self> {
        let (_, path) = virtual_uri.split_once("://")?;
        if path.is_empty() {
            return None;
        }
        Some(Self(format!("{VIRTUAL_SCHEME}://{path}")))
    }

    /// Returns the key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reconstruct the `file://` URI of the source document
    pub fn source_uri(&self) -> Option<Url> {
        let path = self
            .0
            .strip_prefix(VIRTUAL_SCHEME)
            .and_then(|rest| rest.strip_prefix("://"))?;
        let path = path.strip_suffix(VIRTUAL_SUFFIX).unwrap_or(path);
        Url::parse(&format!("file://{path}")).ok()
    }
}

impl fmt::Display for VirtualKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check whether the URI points at a McCode instrument or component file
pub fn is_mccode_document(uri: &Url) -> bool {
    let path = uri.path().to_ascii_lowercase();
    MCCODE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
