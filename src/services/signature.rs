//! Extension allowlist and magic-byte signatures for accepted upload types.

use std::path::Path;

/// Bytes buffered from the head of an upload before the signature check.
/// Large enough to cover every signature below.
pub const SIGNATURE_PREFIX_LEN: usize = 16;

/// A type family the gateway accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Png,
    Jpeg,
    Pdf,
}

impl FileKind {
    /// Classify a normalized (lowercase, dotless) extension.
    ///
    /// Anything not listed here is rejected.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Leading bytes every file of this family starts with.
    pub fn signature(self) -> &'static [u8] {
        match self {
            Self::Png => b"\x89PNG\r\n\x1a\n",
            Self::Jpeg => b"\xff\xd8\xff",
            Self::Pdf => b"%PDF-",
        }
    }

    pub fn matches(self, prefix: &[u8]) -> bool {
        prefix.starts_with(self.signature())
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Pdf => "application/pdf",
        }
    }
}

/// Lowercased extension of a client-supplied filename, without the dot.
///
/// Used for classification only; the result never becomes part of a path
/// unless it also passes [`FileKind::from_extension`].
pub fn normalized_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}
