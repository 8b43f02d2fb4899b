// Attachment content-type detection: extension first, magic bytes second.

const EXTENSION_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("json", "application/json"),
    ("html", "text/html"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("bin", "application/octet-stream"),
];

/// Determines an attachment's content type and the extension used to form
/// its download URL.
///
/// A filename extension, when present, wins. Otherwise the first KB of the
/// body is sniffed: a few common magic numbers, then a UTF-8 check, then
/// `application/octet-stream`.
pub fn detect_content_type(peeked: &[u8], filename: &str) -> (String, String) {
    if let Some(ext) = filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()) {
        if !ext.is_empty() {
            let content_type = EXTENSION_TYPES
                .iter()
                .find(|(e, _)| *e == ext)
                .map(|(_, t)| *t)
                .unwrap_or("application/octet-stream");
            return (content_type.to_string(), format!(".{ext}"));
        }
    }
    let head = &peeked[..peeked.len().min(1024)];
    let content_type = sniff(head);
    let ext = EXTENSION_TYPES
        .iter()
        .find(|(_, t)| *t == content_type)
        .map(|(e, _)| format!(".{e}"))
        .unwrap_or_else(|| ".bin".to_string());
    (content_type.to_string(), ext)
}

/// Content type for a download, derived from the requested path's extension.
pub fn type_for_path(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some(ext) => EXTENSION_TYPES
            .iter()
            .find(|(e, _)| *e == ext.to_lowercase())
            .map(|(_, t)| *t)
            .unwrap_or("application/octet-stream"),
        None => "application/octet-stream",
    }
}

fn sniff(head: &[u8]) -> &'static str {
    if head.starts_with(b"\x89PNG") {
        "image/png"
    } else if head.starts_with(b"\xFF\xD8\xFF") {
        "image/jpeg"
    } else if head.starts_with(b"GIF8") {
        "image/gif"
    } else if head.starts_with(b"%PDF") {
        "application/pdf"
    } else if head.starts_with(b"PK\x03\x04") {
        "application/zip"
    } else if head.starts_with(b"\x1F\x8B") {
        "application/gzip"
    } else if std::str::from_utf8(head).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}
