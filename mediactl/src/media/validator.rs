//! Upload validation: sniff, allowlist check, then compress against the size ceiling.

use futures::future::try_join_all;
use tracing::{debug, instrument, warn};

use super::{CompressionPolicy, ImageCompressor, ImageKind, NormalizedFile, UploadedFile, sniff};
use crate::errors::{Error, Result};
use crate::limits::CompressionSlots;

#[derive(Debug, Clone)]
pub struct UploadValidator {
    policy: CompressionPolicy,
    compressor: ImageCompressor,
    slots: CompressionSlots,
}

impl UploadValidator {
    /// A validator with one compression slot per CPU.
    pub fn new(policy: CompressionPolicy) -> Self {
        let compressor = ImageCompressor::new(&policy);
        Self {
            policy,
            compressor,
            slots: CompressionSlots::default(),
        }
    }

    /// Share `slots` with every other user of the same limiter.
    pub fn with_compression_slots(mut self, slots: CompressionSlots) -> Self {
        self.slots = slots;
        self
    }

    pub fn policy(&self) -> &CompressionPolicy {
        &self.policy
    }

    /// Validate a single upload.
    #[instrument(skip_all, fields(filename = file.as_ref().map(|f| f.filename.as_str()).unwrap_or_default()), err)]
    pub async fn validate(&self, file: Option<UploadedFile>) -> Result<NormalizedFile> {
        let file = file.filter(|f| !f.is_empty()).ok_or(Error::NoFileProvided)?;
        let kind = self.check_type(&file)?;
        self.normalize(file, kind).await
    }

    /// Validate a batch. Every file's type is checked before any compression starts, so a
    /// single disallowed file rejects the batch without wasted work. Output order matches
    /// input order.
    #[instrument(skip_all, fields(count = files.len()), err)]
    pub async fn validate_all(&self, files: Vec<UploadedFile>) -> Result<Vec<NormalizedFile>> {
        if files.is_empty() {
            return Err(Error::NoFilesProvided);
        }

        let checked = files
            .into_iter()
            .map(|file| {
                if file.is_empty() {
                    return Err(Error::NoFileProvided);
                }
                let kind = self.check_type(&file)?;
                Ok((file, kind))
            })
            .collect::<Result<Vec<_>>>()?;

        try_join_all(checked.into_iter().map(|(file, kind)| self.normalize(file, kind))).await
    }

    fn check_type(&self, file: &UploadedFile) -> Result<ImageKind> {
        let sniffed = sniff::detect(&file.buffer);
        match sniffed.mime_type().and_then(ImageKind::from_mime) {
            Some(kind) if self.policy.allows(kind) => {
                if file.content_type.as_deref().is_some_and(|declared| declared != kind.mime_type()) {
                    debug!(
                        filename = %file.filename,
                        declared = ?file.content_type,
                        detected = %kind,
                        "Declared content type differs from detected type"
                    );
                }
                Ok(kind)
            }
            _ => {
                warn!(
                    filename = %file.filename,
                    declared = ?file.content_type,
                    detected = %sniffed,
                    "Rejected upload with disallowed content"
                );
                Err(Error::InvalidFileType {
                    detected: sniffed.mime_type().map(str::to_string),
                })
            }
        }
    }

    async fn normalize(&self, file: UploadedFile, kind: ImageKind) -> Result<NormalizedFile> {
        let compressor = self.compressor;
        let max_size_bytes = self.policy.max_size_bytes;
        let original_size_bytes = file.size_bytes();
        let buffer = file.buffer.clone();

        let buffer = self
            .slots
            .run(move || compressor.compress(buffer, kind, max_size_bytes))
            .await??;

        Ok(NormalizedFile {
            filename: file.filename,
            declared_content_type: file.content_type,
            kind,
            original_size_bytes,
            buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{jpeg_fixture, noise_png_fixture, png_fixture};
    use bytes::Bytes;

    fn validator() -> UploadValidator {
        UploadValidator::new(CompressionPolicy::default())
    }

    fn executable() -> Bytes {
        let mut exe = b"MZ\x90\x00\x03\x00\x00\x00\x04\x00\x00\x00\xFF\xFF\x00\x00".to_vec();
        exe.resize(512, 0);
        Bytes::from(exe)
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = validator().validate(None).await.unwrap_err();
        assert!(matches!(err, Error::NoFileProvided));
    }

    #[tokio::test]
    async fn test_empty_file_counts_as_missing() {
        let file = UploadedFile::new("cat.png", Some("image/png".to_string()), Bytes::new());
        let err = validator().validate(Some(file)).await.unwrap_err();
        assert!(matches!(err, Error::NoFileProvided));
    }

    #[tokio::test]
    async fn test_true_type_wins_over_filename_and_declared_type() {
        // PNG bytes uploaded as a .jpg with a JPEG content type
        let file = UploadedFile::new("holiday.jpg", Some("image/jpeg".to_string()), png_fixture(16, 16));
        let normalized = validator().validate(Some(file)).await.unwrap();
        assert_eq!(normalized.kind, ImageKind::Png);
        assert_eq!(normalized.content_type(), "image/png");
        assert_eq!(normalized.filename, "holiday.jpg");
        assert_eq!(normalized.declared_content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_renamed_executable_is_rejected() {
        let file = UploadedFile::new("photo.png", Some("image/png".to_string()), executable());
        let err = validator().validate(Some(file)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidFileType { .. }));
    }

    #[tokio::test]
    async fn test_small_file_with_only_image_magic_is_rejected() {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(b"<html><script>document.cookie</script></html>");
        let file = UploadedFile::new("x.png", None, bytes);
        let err = validator().validate(Some(file)).await.unwrap_err();
        match err {
            Error::InvalidFileType { detected } => assert_eq!(detected.as_deref(), Some("image/png")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_allowlist_is_respected() {
        let policy = CompressionPolicy {
            allowed_types: vec![ImageKind::Jpeg],
            ..CompressionPolicy::default()
        };
        let file = UploadedFile::new("cat.png", None, png_fixture(8, 8));
        let err = UploadValidator::new(policy).validate(Some(file)).await.unwrap_err();
        match err {
            Error::InvalidFileType { detected } => assert_eq!(detected.as_deref(), Some("image/png")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_upload_is_compressed() {
        let policy = CompressionPolicy {
            max_size_bytes: 100 * 1024,
            ..CompressionPolicy::default()
        };
        let png = noise_png_fixture(512, 512);
        let original = png.len() as u64;
        let file = UploadedFile::new("noise.png", Some("image/png".to_string()), png);

        let normalized = UploadValidator::new(policy).validate(Some(file)).await.unwrap();
        assert_eq!(normalized.original_size_bytes, original);
        assert!(normalized.size_bytes() <= 100 * 1024);
        assert!(normalized.size_bytes() < original);
    }

    #[tokio::test]
    async fn test_uncompressible_upload_is_resource_exhausted() {
        let policy = CompressionPolicy {
            max_size_bytes: 64,
            ..CompressionPolicy::default()
        };
        let file = UploadedFile::new("noise.png", None, noise_png_fixture(128, 128));
        let err = UploadValidator::new(policy).validate(Some(file)).await.unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { max_size_bytes: 64, .. }));
    }

    #[tokio::test]
    async fn test_batch_compression_shares_one_slot() {
        let policy = CompressionPolicy {
            max_size_bytes: 32 * 1024,
            ..CompressionPolicy::default()
        };
        let slots = CompressionSlots::new(1);
        let validator = UploadValidator::new(policy).with_compression_slots(slots.clone());

        let files = (0..3)
            .map(|i| UploadedFile::new(format!("{i}.png"), None, noise_png_fixture(160, 160)))
            .collect();
        let normalized = validator.validate_all(files).await.unwrap();

        assert_eq!(normalized.len(), 3);
        assert!(normalized.iter().all(|f| f.size_bytes() <= 32 * 1024));
        assert_eq!(slots.available(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let err = validator().validate_all(vec![]).await.unwrap_err();
        assert!(matches!(err, Error::NoFilesProvided));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let files = vec![
            UploadedFile::new("a.png", None, png_fixture(4, 4)),
            UploadedFile::new("b.jpg", None, jpeg_fixture(4, 4)),
            UploadedFile::new("c.png", None, png_fixture(6, 6)),
        ];
        let normalized = validator().validate_all(files).await.unwrap();
        let names: Vec<_> = normalized.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, ["a.png", "b.jpg", "c.png"]);
        assert_eq!(normalized[1].kind, ImageKind::Jpeg);
    }

    #[tokio::test]
    async fn test_one_bad_type_rejects_the_batch() {
        let files = vec![
            UploadedFile::new("a.png", None, png_fixture(4, 4)),
            UploadedFile::new("b.png", None, executable()),
            UploadedFile::new("c.jpg", None, jpeg_fixture(4, 4)),
        ];
        let err = validator().validate_all(files).await.unwrap_err();
        assert!(matches!(err, Error::InvalidFileType { .. }));
    }

    #[tokio::test]
    async fn test_empty_member_rejects_the_batch() {
        let files = vec![
            UploadedFile::new("a.png", None, png_fixture(4, 4)),
            UploadedFile::new("b.png", None, Bytes::new()),
        ];
        let err = validator().validate_all(files).await.unwrap_err();
        assert!(matches!(err, Error::NoFileProvided));
    }
}
