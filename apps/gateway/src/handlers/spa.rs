//! Static asset + SPA fallback for everything not under `/api/` (C7's
//! catch-all surface). `tower_http::services::ServeDir` already canonicalizes
//! requested paths and rejects traversal outside its root, falling back to
//! `index.html` for any path it can't resolve to a file on disk.

use tower_http::services::{ServeDir, ServeFile};

const STATIC_ROOT: &str = "./web/dist";
const INDEX_FILE: &str = "./web/dist/index.html";

pub fn service() -> ServeDir<ServeFile> {
    ServeDir::new(STATIC_ROOT).not_found_service(ServeFile::new(INDEX_FILE))
}
