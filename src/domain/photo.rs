//! Item photos
//!
//! `ImageFile` is what the reporter picked; `PhotoPayload` is the inline,
//! self-describing form (`data:<mime>;base64,<bytes>`) sent to the tagging
//! service and used as the optimistic preview URL.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// A photo file chosen by the reporter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Declared content type; inferred from the file name when absent
    pub content_type: Option<String>,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn mime_type(&self) -> String {
        match &self.content_type {
            Some(ct) if !ct.trim().is_empty() => ct.trim().to_string(),
            _ => mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Inline image: mime type plus base64-encoded bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoPayload {
    pub mime_type: String,
    pub data: String,
}

impl PhotoPayload {
    pub fn from_image(image: &ImageFile) -> Self {
        Self {
            mime_type: image.mime_type(),
            data: STANDARD.encode(&image.bytes),
        }
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_inferred_from_name() {
        let image = ImageFile::new("wallet.jpg", vec![1, 2, 3]);
        assert_eq!(image.mime_type(), "image/jpeg");

        let declared = ImageFile::new("upload.bin", vec![1]).with_content_type("image/png");
        assert_eq!(declared.mime_type(), "image/png");
    }

    #[test]
    fn test_data_uri_format() {
        let image = ImageFile::new("dot.png", b"abc".to_vec());
        let payload = PhotoPayload::from_image(&image);
        assert_eq!(payload.to_data_uri(), "data:image/png;base64,YWJj");
    }
}
