//! Media payloads handed to the upload collaborator.

use bytes::Bytes;

use crate::domain::error::DomainError;

const IMAGE_PREFIXES: &[&str] = &["image/"];

/// A file selected for a post, before upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl MediaFile {
    /// Build a media file, guessing the content type from the file name.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let content_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            name,
            content_type,
            data: data.into(),
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn is_image(&self) -> bool {
        IMAGE_PREFIXES
            .iter()
            .any(|prefix| self.content_type.starts_with(prefix))
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.data.is_empty() {
            return Err(DomainError::validation("media payload is empty"));
        }
        if !self.is_image() {
            return Err(DomainError::validation(format!(
                "media `{}` has unsupported content type `{}`",
                self.name, self.content_type
            )));
        }
        Ok(())
    }
}

/// Identifier and public URL returned by a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub id: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_is_guessed_from_name() {
        let file = MediaFile::new("beach.png", vec![1, 2, 3]);
        assert_eq!(file.content_type, "image/png");
        assert!(file.is_image());
        assert_eq!(file.size_bytes(), 3);
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        let file = MediaFile::new("notes.unknownext", vec![1]);
        assert_eq!(file.content_type, "application/octet-stream");
        assert!(file.validate().is_err());
    }

    #[test]
    fn empty_payload_is_rejected() {
        let file = MediaFile::new("beach.jpg", Vec::<u8>::new());
        assert!(matches!(
            file.validate(),
            Err(DomainError::Validation { .. })
        ));
    }
}
