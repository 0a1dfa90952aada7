//! `multipart/form-data` bodies for mutating API calls
//!
//! The boundary is derived from a request-specific seed (login, folder name,
//! node id, local path). It only has to be unique per request, not secret.

use sha2::{Digest, Sha256};

pub struct MultipartBody {
    boundary: String,
    parts: Vec<Vec<u8>>,
}

impl MultipartBody {
    pub fn new(seed: &str) -> Self {
        let digest = format!("{:x}", Sha256::digest(seed.as_bytes()));
        Self {
            boundary: digest[..32].to_string(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        let part = format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            name, value
        );
        self.parts.push(part.into_bytes());
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        let mut part = format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Transfer-Encoding: binary\r\n\
             Content-Type: {}\r\n\r\n",
            name, file_name, content_type
        )
        .into_bytes();
        part.extend_from_slice(data);
        part.extend_from_slice(b"\r\n");
        self.parts.push(part);
        self
    }

    /// Serialize the body. Every request asks for an XML response.
    pub fn finish(self) -> Vec<u8> {
        let this = self.text("format", "xml");
        let separator = format!("--{}\r\n", this.boundary);
        let mut body = Vec::new();
        for part in &this.parts {
            body.extend_from_slice(separator.as_bytes());
            body.extend_from_slice(part);
        }
        body.extend_from_slice(format!("--{}--\r\n", this.boundary).as_bytes());
        body
    }
}

/// Content type for an upload, chosen from the file extension.
pub fn image_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
