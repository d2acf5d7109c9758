//! multipart/form-data encoding for file uploads.

use std::path::Path;

/// A file ready to be sent as a form part
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    #[allow(dead_code)] // For uploads from memory rather than disk
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let content_type = guess_content_type(path).to_string();
        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }
}

/// Content type from the file extension; images only, else octet-stream
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Encoded form body plus the matching Content-Type header value
pub struct MultipartBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub struct MultipartBuilder {
    boundary: String,
    bytes: Vec<u8>,
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self::with_boundary(format!("restora-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            bytes: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.open_part();
        self.bytes.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                escape_quoted(name)
            )
            .as_bytes(),
        );
        self.bytes.extend_from_slice(value.as_bytes());
        self.bytes.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, file: &UploadFile) -> Self {
        self.open_part();
        self.bytes.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                escape_quoted(name),
                escape_quoted(&file.file_name),
                file.content_type
            )
            .as_bytes(),
        );
        self.bytes.extend_from_slice(&file.bytes);
        self.bytes.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> MultipartBody {
        self.bytes
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        MultipartBody {
            content_type: format!("multipart/form-data; boundary={}", self.boundary),
            bytes: self.bytes,
        }
    }

    fn open_part(&mut self) {
        self.bytes
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
    }
}

impl Default for MultipartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "%22")
        .replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodes_fields_and_file() {
        let file = UploadFile::new("old photo.png", "image/png", b"PNGDATA".to_vec());
        let body = MultipartBuilder::with_boundary("XYZ")
            .text("model_id", "3")
            .file("file", &file)
            .finish();

        assert_eq!(body.content_type, "multipart/form-data; boundary=XYZ");
        let expected = "--XYZ\r\n\
Content-Disposition: form-data; name=\"model_id\"\r\n\r\n\
3\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"old photo.png\"\r\n\
Content-Type: image/png\r\n\r\n\
PNGDATA\r\n\
--XYZ--\r\n";
        assert_eq!(String::from_utf8(body.bytes).unwrap(), expected);
    }

    #[test]
    fn test_quotes_in_filename_are_escaped() {
        let file = UploadFile::new("a\"b.jpg", "image/jpeg", Vec::new());
        let body = MultipartBuilder::with_boundary("B").file("file", &file).finish();
        let text = String::from_utf8(body.bytes).unwrap();
        assert!(text.contains("filename=\"a%22b.jpg\""));
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("x.JPG")), "image/jpeg");
        assert_eq!(guess_content_type(Path::new("x.webp")), "image/webp");
        assert_eq!(guess_content_type(Path::new("x")), "application/octet-stream");
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, b"abc").unwrap();
        let file = UploadFile::from_path(&path).unwrap();
        assert_eq!(file.file_name, "scan.png");
        assert_eq!(file.content_type, "image/png");
        assert_eq!(file.bytes, b"abc");
    }
}
