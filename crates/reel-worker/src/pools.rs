//! Category source pools.
//!
//! A pool lists the background clips available for one category. Remote
//! entries stay URLs until the segment assembler picks them; the
//! [`SourceResolver`] then downloads them into the job's cache directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use reel_media::{MediaError, MediaResult, SourceFetcher, SourcePool, SourceRef};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// File in a category directory listing remote sources, one URL per line.
pub const REMOTE_LIST_FILE: &str = "sources.txt";

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "m4v", "avi"];

/// Lookup of sources per category.
#[async_trait]
pub trait SourcePools: Send + Sync {
    /// Sources for `category`; an unknown category yields an empty list.
    async fn sources(&self, category: &str) -> WorkerResult<Vec<SourceRef>>;
}

/// Pools laid out on disk as `<root>/<category>/*.mp4`, with optional
/// remote URLs in `<root>/<category>/sources.txt`.
#[derive(Debug, Clone)]
pub struct DirectoryPools {
    root: PathBuf,
}

impl DirectoryPools {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Category names become directory names; reject anything that could
/// escape the pool root.
fn valid_category(category: &str) -> bool {
    !category.is_empty()
        && category
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl SourcePools for DirectoryPools {
    async fn sources(&self, category: &str) -> WorkerResult<Vec<SourceRef>> {
        if !valid_category(category) {
            return Err(WorkerError::invalid_job(format!(
                "invalid category name: {:?}",
                category
            )));
        }

        let dir = self.root.join(category);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(category = category, dir = %dir.display(), "Category pool not found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut local = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && is_video_file(&path) {
                local.push(path);
            }
        }
        // read_dir order is unspecified
        local.sort();

        let mut sources: Vec<SourceRef> = local.into_iter().map(SourceRef::Local).collect();

        match tokio::fs::read_to_string(dir.join(REMOTE_LIST_FILE)).await {
            Ok(list) => sources.extend(
                list.lines()
                    .map(str::trim)
                    .filter(|line| is_http_url(line))
                    .map(|url| SourceRef::Remote(url.to_string())),
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!(category = category, count = sources.len(), "Listed pool sources");
        Ok(sources)
    }
}

/// Extension of the last path segment of a URL, ignoring query and fragment.
fn infer_extension_from_url(url: &str) -> Option<String> {
    let no_frag = url.split('#').next().unwrap_or(url);
    let no_query = no_frag.split('?').next().unwrap_or(no_frag);
    let ext = Path::new(no_query)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())?;
    VIDEO_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Downloads remote sources into a cache directory.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl SourceResolver {
    pub fn new(client: reqwest::Client, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            cache_dir: cache_dir.into(),
        }
    }

    /// Download `url` to a uuid-named file in the cache directory.
    async fn download(&self, url: &str) -> WorkerResult<PathBuf> {
        let ext = infer_extension_from_url(url).unwrap_or_else(|| "mp4".to_string());
        let out_path = self
            .cache_dir
            .join(format!("{}.{}", uuid::Uuid::new_v4().simple(), ext));
        let tmp_path = out_path.with_extension("tmp");

        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(WorkerError::download_failed(format!(
                "{}: HTTP {}",
                url,
                response.status()
            )));
        }

        let written = self.stream_to_file(response, &tmp_path).await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        tokio::fs::rename(&tmp_path, &out_path).await?;

        debug!(url = url, path = %out_path.display(), "Downloaded remote source");
        Ok(out_path)
    }

    async fn stream_to_file(&self, response: reqwest::Response, path: &Path) -> WorkerResult<()> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for SourceResolver {
    async fn fetch(&self, url: &str) -> MediaResult<PathBuf> {
        let result = self.download(url).await;
        metrics::record_source_download(result.is_ok());
        result.map_err(|e| MediaError::SourceUnavailable(e.to_string()))
    }
}

/// Look up every category as a [`SourcePool`], in request order.
///
/// Nothing is downloaded here. A category whose lookup fails contributes
/// an empty pool; an invalid category name fails the job.
pub async fn list_pools(
    pools: &dyn SourcePools,
    categories: &[String],
) -> WorkerResult<Vec<SourcePool>> {
    let mut listed = Vec::with_capacity(categories.len());
    for category in categories {
        let sources = match pools.sources(category).await {
            Ok(sources) => sources,
            Err(e @ WorkerError::InvalidJob(_)) => return Err(e),
            Err(e) => {
                warn!(category = %category, error = %e, "Failed to list pool");
                Vec::new()
            }
        };
        listed.push(SourcePool::new(category.clone(), sources));
    }
    Ok(listed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedPools(Vec<(String, Vec<SourceRef>)>);

    #[async_trait]
    impl SourcePools for FixedPools {
        async fn sources(&self, category: &str) -> WorkerResult<Vec<SourceRef>> {
            Ok(self
                .0
                .iter()
                .find(|(c, _)| c == category)
                .map(|(_, refs)| refs.clone())
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_directory_pools_lists_videos_and_urls() {
        let dir = TempDir::new().unwrap();
        let city = dir.path().join("city");
        tokio::fs::create_dir_all(&city).await.unwrap();
        tokio::fs::write(city.join("b.mp4"), b"x").await.unwrap();
        tokio::fs::write(city.join("a.MOV"), b"x").await.unwrap();
        tokio::fs::write(city.join("notes.txt"), b"x").await.unwrap();
        tokio::fs::write(
            city.join(REMOTE_LIST_FILE),
            "https://cdn.example.com/c.mp4\n\n# comment\nftp://nope\n",
        )
        .await
        .unwrap();

        let pools = DirectoryPools::new(dir.path());
        let sources = pools.sources("city").await.unwrap();
        assert_eq!(
            sources,
            vec![
                SourceRef::Local(city.join("a.MOV")),
                SourceRef::Local(city.join("b.mp4")),
                SourceRef::Remote("https://cdn.example.com/c.mp4".to_string()),
            ]
        );

        assert!(pools.sources("ocean").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_category_names_cannot_escape_root() {
        let dir = TempDir::new().unwrap();
        let pools = DirectoryPools::new(dir.path());
        let err = pools.sources("../etc").await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidJob(_)));
    }

    #[tokio::test]
    async fn test_list_pools_keeps_order_and_defers_downloads() {
        let remote = SourceRef::Remote("https://cdn.invalid/city/2.mp4".into());
        let pools = FixedPools(vec![
            (
                "city".into(),
                vec![SourceRef::Local("/pool/city/1.mp4".into()), remote.clone()],
            ),
            ("nature".into(), vec![]),
        ]);

        let listed = list_pools(&pools, &["nature".to_string(), "city".to_string()])
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].category, "nature");
        assert!(listed[0].sources.is_empty());
        assert_eq!(
            listed[1].sources,
            vec![SourceRef::Local("/pool/city/1.mp4".into()), remote]
        );
    }

    #[tokio::test]
    async fn test_list_pools_rejects_bad_category() {
        let dir = TempDir::new().unwrap();
        let pools = DirectoryPools::new(dir.path());
        let err = list_pools(&pools, &["city".to_string(), "../etc".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidJob(_)));
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        let resolver = SourceResolver::new(reqwest::Client::new(), &cache);

        // Nothing listens on the discard port
        let err = resolver.fetch("http://127.0.0.1:9/clip.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::SourceUnavailable(_)));
        let mut entries = tokio::fs::read_dir(&cache).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[test]
    fn test_infer_extension_from_url() {
        assert_eq!(
            infer_extension_from_url("https://x/y.MP4?sig=1").as_deref(),
            Some("mp4")
        );
        assert_eq!(infer_extension_from_url("https://x/y.png"), None);
        assert_eq!(infer_extension_from_url("https://x/y"), None);
    }
}
