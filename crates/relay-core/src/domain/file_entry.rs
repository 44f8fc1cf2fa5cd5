//! FileEntry: immutable handle to stored content.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extension: Option<String>,
    mime_type: String,
    size: u64,
    /// Backend reference, e.g. `memory://files/<key>` or `file:///...`.
    url: String,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, size: u64, url: impl Into<String>) -> Self {
        let name = name.into();
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty());
        let mime_type = mime_type_for(extension.as_deref()).to_string();
        Self {
            name,
            extension,
            mime_type,
            size,
            url: url.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn mime_type_for(extension: Option<&str>) -> &'static str {
    match extension {
        Some("txt") | Some("log") => "text/plain",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("xml") => "application/xml",
        Some("html") | Some("htm") => "text/html",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("notes.txt", Some("txt"), "text/plain")]
    #[case("data.JSON", Some("json"), "application/json")]
    #[case("archive", None, "application/octet-stream")]
    fn derives_extension_and_mime_type(
        #[case] name: &str,
        #[case] extension: Option<&str>,
        #[case] mime_type: &str,
    ) {
        let entry = FileEntry::new(name, 0, "memory://files/x");
        assert_eq!(entry.extension(), extension);
        assert_eq!(entry.mime_type(), mime_type);
    }

    #[test]
    fn serializes_in_camel_case() {
        let entry = FileEntry::new("a.csv", 12, "memory://files/a");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["mimeType"], "text/csv");
        assert_eq!(value["size"], 12);
    }
}
