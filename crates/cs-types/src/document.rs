//! Portable, versioned configuration documents.
//!
//! A saved scan configuration is plain JSON so it can be exchanged between
//! tools independent of any one runtime's native serialization.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config_error;
use crate::errors::CsResult;
use crate::space::SearchSpace;

pub const DOCUMENT_FORMAT: &str = "composition-scan";
pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanDocument {
    pub format: String,
    pub version: u32,
    pub space: SearchSpace,
}

impl ScanDocument {
    pub fn new(space: SearchSpace) -> Self {
        Self {
            format: DOCUMENT_FORMAT.to_string(),
            version: DOCUMENT_VERSION,
            space,
        }
    }

    pub fn to_json(&self) -> CsResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document, checking the format tag, the version and the space.
    pub fn from_json(json: &str) -> CsResult<Self> {
        let doc: ScanDocument = serde_json::from_str(json)?;
        if doc.format != DOCUMENT_FORMAT {
            return Err(config_error!(
                "expected a '{DOCUMENT_FORMAT}' document, found '{}'",
                doc.format
            ));
        }
        if doc.version != DOCUMENT_VERSION {
            return Err(config_error!(
                "unsupported document version {} (supported: {DOCUMENT_VERSION})",
                doc.version
            ));
        }
        doc.space.validate()?;
        Ok(doc)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> CsResult<()> {
        self.space.validate()?;
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> CsResult<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn into_space(self) -> SearchSpace {
        self.space
    }
}
