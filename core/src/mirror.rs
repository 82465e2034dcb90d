use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::MirrorConfig;
use crate::errors::{self, ConfigError, FetchError, StorageError};
use crate::fetch;
use crate::storage::ObjectStorage;

/// One monthly compressed CSV in the public trip-data archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveFile {
    pub color: String,
    pub year: i32,
    pub month: u32,
}

impl ArchiveFile {
    pub fn file_name(&self) -> String {
        format!("{}_tripdata_{}-{:02}.csv.gz", self.color, self.year, self.month)
    }

    /// Release assets are grouped under a tag named after the color.
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            self.color,
            self.file_name()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorReport {
    pub downloaded: usize,
    pub download_failed: usize,
    pub uploaded: usize,
    pub upload_failed: usize,
}

/// Copies archive files from HTTP into object storage.
///
/// Files are handled per (color, year) group: every month of the group is
/// downloaded by a bounded pool, then the downloaded files are uploaded by a
/// second pool. Failures skip the file and never stop the run.
pub struct ArchiveMirror<S: ObjectStorage> {
    client: Client,
    storage: S,
    config: MirrorConfig,
}

impl<S: ObjectStorage> ArchiveMirror<S> {
    pub fn new(client: Client, storage: S, config: MirrorConfig) -> Self {
        Self {
            client,
            storage,
            config,
        }
    }

    pub fn from_config(storage: S, config: MirrorConfig) -> Result<Self, ConfigError> {
        let client = fetch::http_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self::new(client, storage, config))
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub async fn run(&self) -> errors::Result<MirrorReport> {
        self.storage.ensure_bucket().await?;
        tokio::fs::create_dir_all(&self.config.download_dir).await?;

        let mut report = MirrorReport::default();
        for color in &self.config.colors {
            for year in &self.config.years {
                let files: Vec<ArchiveFile> = self
                    .config
                    .months
                    .iter()
                    .map(|month| ArchiveFile {
                        color: color.clone(),
                        year: *year,
                        month: *month,
                    })
                    .collect();
                info!("Mirroring {} {} files for {}", files.len(), color, year);

                let downloads: Vec<Option<(ArchiveFile, PathBuf)>> = stream::iter(files)
                    .map(|file| self.download(file))
                    .buffer_unordered(self.config.download_workers.max(1))
                    .collect()
                    .await;

                let mut local_files = Vec::with_capacity(downloads.len());
                for download in downloads {
                    match download {
                        Some(file) => {
                            report.downloaded += 1;
                            local_files.push(file);
                        }
                        None => report.download_failed += 1,
                    }
                }

                let uploads: Vec<bool> = stream::iter(local_files)
                    .map(|(file, path)| self.upload(file, path))
                    .buffer_unordered(self.config.upload_workers.max(1))
                    .collect()
                    .await;

                let uploaded = uploads.iter().filter(|ok| **ok).count();
                report.uploaded += uploaded;
                report.upload_failed += uploads.len() - uploaded;
            }
        }

        info!(
            "Mirror finished: {} downloaded, {} uploaded, {} download failures, {} upload failures",
            report.downloaded, report.uploaded, report.download_failed, report.upload_failed
        );
        Ok(report)
    }

    async fn download(&self, file: ArchiveFile) -> Option<(ArchiveFile, PathBuf)> {
        let url = file.url(&self.config.base_url);
        let path = Path::new(&self.config.download_dir).join(file.file_name());

        let (client, url_ref, path_ref) = (&self.client, &url, &path);
        let result = self
            .config
            .download_retry
            .run_if(&url, FetchError::is_transient, move || async move {
                fetch::download_to(client, url_ref, path_ref).await
            })
            .await;

        match result {
            Ok(bytes) => {
                info!("Downloaded {} ({} bytes)", file.file_name(), bytes);
                Some((file, path))
            }
            Err(e) => {
                warn!("Skipping download of {}: {}", file.file_name(), e);
                None
            }
        }
    }

    async fn upload(&self, file: ArchiveFile, path: PathBuf) -> bool {
        let key = self.storage.object_key(&file.file_name());

        let (storage, key_ref, path_ref) = (&self.storage, &key, &path);
        let result = self
            .config
            .upload_retry
            .run_if(&key, StorageError::is_transient, move || async move {
                storage.upload_file(key_ref, path_ref).await?;
                if storage.exists(key_ref).await? {
                    Ok(())
                } else {
                    Err(StorageError::VerificationFailed {
                        key: key_ref.clone(),
                    })
                }
            })
            .await;

        match result {
            Ok(()) => {
                info!("Uploaded {} to s3://{}/{}", file.file_name(), self.storage.bucket(), key);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove local file {}: {}", path.display(), e);
                }
                true
            }
            Err(e) => {
                warn!("Giving up on upload of {}: {}", file.file_name(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct FakeStorage {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        forbidden: bool,
        failing_keys: HashSet<String>,
        unverifiable_keys: HashSet<String>,
        upload_calls: AtomicUsize,
    }

    impl FakeStorage {
        fn keys(&self) -> Vec<String> {
            let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        }
    }

    impl ObjectStorage for FakeStorage {
        fn bucket(&self) -> &str {
            "taxi-archive"
        }

        fn object_key(&self, name: &str) -> String {
            crate::storage::join_key("raw", name)
        }

        async fn ensure_bucket(&self) -> Result<(), StorageError> {
            if self.forbidden {
                return Err(StorageError::BucketForbidden {
                    bucket: "taxi-archive".to_string(),
                });
            }
            Ok(())
        }

        async fn upload_file(&self, key: &str, path: &Path) -> Result<(), StorageError> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_keys.contains(key) {
                return Err(StorageError::Request {
                    operation: "PutObject".to_string(),
                    target: key.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            let body = std::fs::read(path)?;
            if !self.unverifiable_keys.contains(key) {
                self.objects.lock().unwrap().insert(key.to_string(), body);
            }
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool, StorageError> {
            Ok(self.objects.lock().unwrap().contains_key(key))
        }
    }

    fn mirror_config(base_url: &str, download_dir: &Path) -> MirrorConfig {
        let yaml = format!(
            r#"
base_url: "{}"
colors: [yellow]
years: [2019]
months: [1, 2, 3]
download_dir: "{}"
storage:
  bucket: "taxi-archive"
  region: "us-east-1"
"#,
            base_url,
            download_dir.display()
        );
        let mut config: MirrorConfig = serde_yaml::from_str(&yaml).unwrap();
        config.upload_retry = RetryPolicy::fixed(3, Duration::from_millis(1));
        config
    }

    async fn archive_server() -> MockServer {
        let server = MockServer::start().await;
        for month in ["01", "03"] {
            Mock::given(method("GET"))
                .and(path(format!("/yellow/yellow_tripdata_2019-{}.csv.gz", month)))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(format!("gz-{}", month)))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/yellow/yellow_tripdata_2019-02.csv.gz"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_archive_file_url() {
        let file = ArchiveFile {
            color: "green".to_string(),
            year: 2020,
            month: 7,
        };
        assert_eq!(file.file_name(), "green_tripdata_2020-07.csv.gz");
        assert_eq!(
            file.url("https://github.com/DataTalksClub/nyc-tlc-data/releases/download/"),
            "https://github.com/DataTalksClub/nyc-tlc-data/releases/download/green/green_tripdata_2020-07.csv.gz"
        );
    }

    #[tokio::test]
    async fn test_mirror_skips_missing_months() {
        let server = archive_server().await;
        let dir = tempfile::tempdir().unwrap();
        let config = mirror_config(&server.uri(), dir.path());

        let mirror = ArchiveMirror::from_config(FakeStorage::default(), config).unwrap();
        let report = mirror.run().await.unwrap();

        assert_eq!(
            report,
            MirrorReport {
                downloaded: 2,
                download_failed: 1,
                uploaded: 2,
                upload_failed: 0,
            }
        );
        assert_eq!(
            mirror.storage().keys(),
            vec![
                "raw/yellow_tripdata_2019-01.csv.gz".to_string(),
                "raw/yellow_tripdata_2019-03.csv.gz".to_string(),
            ]
        );
        assert_eq!(
            mirror.storage().objects.lock().unwrap()["raw/yellow_tripdata_2019-03.csv.gz"],
            b"gz-03".to_vec()
        );
        assert!(!dir.path().join("yellow_tripdata_2019-01.csv.gz").exists());
        assert!(!dir.path().join("yellow_tripdata_2019-02.csv.gz").exists());
    }

    #[tokio::test]
    async fn test_failed_upload_is_retried_then_skipped() {
        let server = archive_server().await;
        let dir = tempfile::tempdir().unwrap();
        let config = mirror_config(&server.uri(), dir.path());

        let storage = FakeStorage {
            failing_keys: HashSet::from(["raw/yellow_tripdata_2019-01.csv.gz".to_string()]),
            ..Default::default()
        };
        let mirror = ArchiveMirror::from_config(storage, config).unwrap();
        let report = mirror.run().await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.upload_failed, 1);
        assert_eq!(mirror.storage().upload_calls.load(Ordering::SeqCst), 4);
        assert!(dir.path().join("yellow_tripdata_2019-01.csv.gz").exists());
        assert!(!dir.path().join("yellow_tripdata_2019-03.csv.gz").exists());
    }

    #[tokio::test]
    async fn test_unverified_upload_counts_as_failure() {
        let server = archive_server().await;
        let dir = tempfile::tempdir().unwrap();
        let config = mirror_config(&server.uri(), dir.path());

        let storage = FakeStorage {
            unverifiable_keys: HashSet::from(["raw/yellow_tripdata_2019-03.csv.gz".to_string()]),
            ..Default::default()
        };
        let mirror = ArchiveMirror::from_config(storage, config).unwrap();
        let report = mirror.run().await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.upload_failed, 1);
        assert!(dir.path().join("yellow_tripdata_2019-03.csv.gz").exists());
    }

    #[tokio::test]
    async fn test_forbidden_bucket_stops_the_run() {
        let server = archive_server().await;
        let dir = tempfile::tempdir().unwrap();
        let config = mirror_config(&server.uri(), dir.path());

        let storage = FakeStorage {
            forbidden: true,
            ..Default::default()
        };
        let mirror = ArchiveMirror::from_config(storage, config).unwrap();
        let result = mirror.run().await;

        assert!(matches!(
            result,
            Err(errors::IngestionError::Storage(StorageError::BucketForbidden { .. }))
        ));
        assert_eq!(mirror.storage().upload_calls.load(Ordering::SeqCst), 0);
    }
}
