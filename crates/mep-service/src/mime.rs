use std::path::Path;

use tokio::io::AsyncReadExt;
use tracing::debug;

/// Bytes read from the head of a file when sniffing its type.
const SNIFF_LEN: u64 = 8192;

/// MIME type of the file at `path`, taken from its leading bytes. Falls back
/// to the extension of `file_name` when the content has no known signature.
pub async fn detect_mime_type(path: &Path, file_name: &str) -> &'static str {
    let mut head = Vec::new();
    let read = match tokio::fs::File::open(path).await {
        Ok(file) => file.take(SNIFF_LEN).read_to_end(&mut head).await,
        Err(e) => Err(e),
    };
    if let Err(e) = read {
        debug!(path = %path.display(), "could not sniff file type: {e}");
    }
    match infer::get(&head) {
        Some(kind) => kind.mime_type(),
        None => guess_mime_type(file_name),
    }
}

/// MIME type inferred from a file name's extension.
pub fn guess_mime_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "zip" => "application/zip",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
