use crate::model::{Camera, StreamPattern};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Brand directory metadata files that are not brand records.
const SKIP_FILES: &[&str] = &["index", "indexa"];

/// Auth query keys used when `query_parameters.json` is absent.
pub const DEFAULT_AUTH_KEYS: &[&str] = &[
    "user", "username", "usr", "loginuse", "password", "pass", "pwd", "loginpas", "passwd",
];

#[derive(Debug, Error)]
pub enum KbError {
    #[error("brand not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid json in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read-only camera pattern corpus. Brand records are decoded lazily and
/// cached process-wide; values are immutable after publication, so a lost
/// update during concurrent population is harmless.
pub struct KnowledgeBase {
    root: PathBuf,
    brands: RwLock<HashMap<String, Arc<Camera>>>,
    patterns: RwLock<Option<Arc<Vec<StreamPattern>>>>,
    query_keys: RwLock<Option<Arc<Vec<String>>>>,
}

impl KnowledgeBase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            brands: RwLock::new(HashMap::new()),
            patterns: RwLock::new(None),
            query_keys: RwLock::new(None),
        }
    }

    fn brands_dir(&self) -> PathBuf {
        self.root.join("brands")
    }

    pub async fn load_brand(&self, brand_id: &str) -> Result<Arc<Camera>, KbError> {
        if let Some(cam) = self.brands.read().await.get(brand_id) {
            return Ok(Arc::clone(cam));
        }

        let path = self.brands_dir().join(format!("{brand_id}.json"));
        let cam = Arc::new(read_camera(&path, brand_id).await?);

        let mut guard = self.brands.write().await;
        let entry = guard.entry(brand_id.to_string()).or_insert_with(|| Arc::clone(&cam));
        Ok(Arc::clone(entry))
    }

    pub async fn list_brands(&self) -> Result<Vec<String>, KbError> {
        let dir = self.brands_dir();
        let mut out = Vec::new();
        let mut rd = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if SKIP_FILES.contains(&stem) {
                continue;
            }
            out.push(stem.to_string());
        }
        out.sort();
        Ok(out)
    }

    pub async fn load_popular_patterns(&self) -> Result<Arc<Vec<StreamPattern>>, KbError> {
        if let Some(patterns) = self.patterns.read().await.as_ref() {
            return Ok(Arc::clone(patterns));
        }

        let path = self.root.join("popular_stream_patterns.json");
        let raw = tokio::fs::read(&path).await?;
        let parsed: Vec<StreamPattern> = serde_json::from_slice(&raw).map_err(|source| KbError::Json {
            path: path.display().to_string(),
            source,
        })?;

        let patterns = Arc::new(parsed);
        *self.patterns.write().await = Some(Arc::clone(&patterns));
        Ok(patterns)
    }

    pub async fn load_query_parameters(&self) -> Result<Arc<Vec<String>>, KbError> {
        if let Some(keys) = self.query_keys.read().await.as_ref() {
            return Ok(Arc::clone(keys));
        }

        let path = self.root.join("query_parameters.json");
        let raw = tokio::fs::read(&path).await?;
        let parsed: Vec<String> = serde_json::from_slice(&raw).map_err(|source| KbError::Json {
            path: path.display().to_string(),
            source,
        })?;

        let keys = Arc::new(parsed);
        *self.query_keys.write().await = Some(Arc::clone(&keys));
        Ok(keys)
    }

    /// Decode every brand file one at a time and keep those the predicate
    /// accepts. Unreadable brands are skipped; the rest proceed.
    pub async fn streaming_search<F>(&self, predicate: F) -> Result<Vec<Camera>, KbError>
    where
        F: Fn(&Camera) -> bool,
    {
        let mut out = Vec::new();
        for brand_id in self.list_brands().await? {
            let path = self.brands_dir().join(format!("{brand_id}.json"));
            match read_camera(&path, &brand_id).await {
                Ok(cam) => {
                    if predicate(&cam) {
                        out.push(cam);
                    }
                }
                Err(err) => {
                    debug!(brand = %brand_id, error = %err, "skipping unreadable brand file");
                }
            }
        }
        Ok(out)
    }
}

async fn read_camera(path: &Path, brand_id: &str) -> Result<Camera, KbError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(KbError::NotFound(brand_id.to_string()));
        }
        Err(err) => return Err(err.into()),
    };

    let mut cam: Camera = serde_json::from_slice(&raw).map_err(|source| KbError::Json {
        path: path.display().to_string(),
        source,
    })?;

    // brand_id always mirrors the filename stem, whatever the file says.
    cam.brand_id = brand_id.to_string();
    Ok(cam)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_kb(dir: &Path) {
        std::fs::create_dir_all(dir.join("brands")).unwrap();
        std::fs::write(
            dir.join("brands/hikvision.json"),
            serde_json::json!({
                "brand": "Hikvision",
                "brand_id": "something-else",
                "entries": [{
                    "models": ["DS-2CD2032", "DS-2CD2142"],
                    "type": "ffmpeg",
                    "protocol": "rtsp",
                    "port": 554,
                    "url": "Streaming/Channels/[CHANNEL+1]01"
                }]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.join("brands/axis.json"),
            serde_json::json!({
                "brand": "Axis",
                "entries": [{
                    "models": ["M1065"],
                    "type": "mjpeg",
                    "protocol": "http",
                    "port": 0,
                    "url": "axis-cgi/mjpg/video.cgi"
                }]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.join("brands/index.json"), "{}").unwrap();
        std::fs::write(dir.join("brands/indexa.json"), "{}").unwrap();
        std::fs::write(
            dir.join("popular_stream_patterns.json"),
            serde_json::json!([{
                "type": "ffmpeg",
                "protocol": "rtsp",
                "port": 0,
                "url": "live/ch0"
            }])
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.join("query_parameters.json"),
            serde_json::json!(["user", "pwd"]).to_string(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn load_brand_caches_and_fixes_brand_id() {
        let tmp = tempfile::tempdir().unwrap();
        write_kb(tmp.path());
        let kb = KnowledgeBase::new(tmp.path());

        let cam = kb.load_brand("hikvision").await.unwrap();
        assert_eq!(cam.brand_id, "hikvision");
        assert_eq!(cam.entries.len(), 1);

        // Second hit comes from the cache even if the file disappears.
        std::fs::remove_file(tmp.path().join("brands/hikvision.json")).unwrap();
        let again = kb.load_brand("hikvision").await.unwrap();
        assert_eq!(again.brand, "Hikvision");
    }

    #[tokio::test]
    async fn load_brand_missing_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        write_kb(tmp.path());
        let kb = KnowledgeBase::new(tmp.path());
        match kb.load_brand("nope").await {
            Err(KbError::NotFound(id)) => assert_eq!(id, "nope"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_brands_skips_index_files() {
        let tmp = tempfile::tempdir().unwrap();
        write_kb(tmp.path());
        let kb = KnowledgeBase::new(tmp.path());
        assert_eq!(kb.list_brands().await.unwrap(), vec!["axis", "hikvision"]);
    }

    #[tokio::test]
    async fn popular_patterns_cache_once() {
        let tmp = tempfile::tempdir().unwrap();
        write_kb(tmp.path());
        let kb = KnowledgeBase::new(tmp.path());

        let first = kb.load_popular_patterns().await.unwrap();
        assert_eq!(first.len(), 1);
        std::fs::remove_file(tmp.path().join("popular_stream_patterns.json")).unwrap();
        let second = kb.load_popular_patterns().await.unwrap();
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn streaming_search_filters_by_predicate() {
        let tmp = tempfile::tempdir().unwrap();
        write_kb(tmp.path());
        let kb = KnowledgeBase::new(tmp.path());

        let hits = kb
            .streaming_search(|cam| cam.entries.iter().any(|e| e.pattern.protocol == "http"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].brand_id, "axis");
    }
}
