//! Static client assets

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

/// A file read from the asset directory
#[derive(Debug, Clone)]
pub struct Asset {
    /// File content
    pub body: Bytes,
    /// Media type derived from the extension
    pub content_type: &'static str,
}

/// Serves files below a root directory
#[derive(Debug, Clone)]
pub struct StaticAssets {
    root: PathBuf,
}

impl StaticAssets {
    /// Serve files below `root`
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Map a request path to a file below the root
    ///
    /// Returns `None` for paths that try to leave the root.
    #[must_use]
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let decoded = urlencoding::decode(request_path).ok()?;
        let mut path = self.root.clone();

        for segment in decoded.split('/') {
            match segment {
                "" | "." => {}
                ".." => return None,
                s if s.contains('\\') || s.contains('\0') => return None,
                s => path.push(s),
            }
        }

        if decoded.ends_with('/') || path == self.root {
            path.push("index.html");
        }
        Some(path)
    }

    /// Read the file for `request_path`
    pub async fn load(&self, request_path: &str) -> Option<Asset> {
        let mut path = self.resolve(request_path)?;

        if tokio::fs::metadata(&path).await.ok()?.is_dir() {
            path.push("index.html");
        }

        match tokio::fs::read(&path).await {
            Ok(content) => Some(Asset {
                body: Bytes::from(content),
                content_type: content_type(&path),
            }),
            Err(e) => {
                debug!("Static asset {} unavailable: {}", path.display(), e);
                None
            }
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn client_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>test</h1>").unwrap();
        std::fs::create_dir(dir.path().join("js")).unwrap();
        std::fs::write(dir.path().join("js/app.js"), "console.log(1)").unwrap();
        dir
    }

    #[test]
    fn test_resolve_root_to_index() {
        let assets = StaticAssets::new(PathBuf::from("/srv/client"));

        assert_eq!(
            assets.resolve("/"),
            Some(PathBuf::from("/srv/client/index.html"))
        );
        assert_eq!(
            assets.resolve("/js/app.js"),
            Some(PathBuf::from("/srv/client/js/app.js"))
        );
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let assets = StaticAssets::new(PathBuf::from("/srv/client"));

        assert_eq!(assets.resolve("/../etc/passwd"), None);
        assert_eq!(assets.resolve("/js/%2e%2e/%2e%2e/secret"), None);
        assert_eq!(assets.resolve("/js\\..\\secret"), None);
    }

    #[tokio::test]
    async fn test_load_files() {
        let dir = client_dir();
        let assets = StaticAssets::new(dir.path().to_path_buf());

        let index = assets.load("/").await.unwrap();
        assert_eq!(index.body, Bytes::from_static(b"<h1>test</h1>"));
        assert_eq!(index.content_type, "text/html; charset=utf-8");

        let script = assets.load("/js/app.js").await.unwrap();
        assert_eq!(script.content_type, "text/javascript; charset=utf-8");

        assert!(assets.load("/missing.css").await.is_none());
    }

    #[test]
    fn test_content_type_fallback() {
        assert_eq!(content_type(Path::new("data.bin")), "application/octet-stream");
        assert_eq!(content_type(Path::new("STYLE.CSS")), "text/css; charset=utf-8");
    }
}
