//! Content type detection from magic bytes.
//!
//! Only the buffer is inspected. Client-supplied filenames and `Content-Type` headers are
//! deliberately not an input here, since they are trivially spoofed.

/// Outcome of sniffing a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffResult {
    Known(&'static str),
    Unknown,
}

impl SniffResult {
    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            SniffResult::Known(mime) => Some(mime),
            SniffResult::Unknown => None,
        }
    }
}

impl std::fmt::Display for SniffResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type().unwrap_or("unknown"))
    }
}

/// Detect the MIME type of `buffer`. Unrecognised or truncated content yields
/// [`SniffResult::Unknown`] rather than an error.
pub fn detect(buffer: &[u8]) -> SniffResult {
    match infer::get(buffer) {
        Some(kind) => SniffResult::Known(kind.mime_type()),
        None => SniffResult::Unknown,
    }
}
