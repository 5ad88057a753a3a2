//! History kept in the GitHub Actions cache.
//!
//! The stored layout lives in a temp directory handled by [`LocalHistoryProvider`]. It is
//! restored from the cache service on first access and archived back (tar + zstd) after
//! every write. Cache entries are immutable, so each save goes under a fresh
//! `<key>-<millis>` entry and restore matches the newest one by prefix.

use std::env;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{info, warn};

use super::{HistoryProvider, LocalHistoryProvider};
use crate::error::{Error, Result};
use crate::schema::Benchmark;

const CACHE_SERVICE: &str = "twirp/github.actions.results.api.v1.CacheService";
const COMPRESSION_METHOD: &str = "zstd-without-long";
const VERSION_SALT: &str = "1.0";
const ZSTD_LEVEL: i32 = 3;

#[derive(Serialize)]
struct GetDownloadUrlRequest<'a> {
    key: &'a str,
    restore_keys: Vec<String>,
    version: &'a str,
}

#[derive(Deserialize)]
struct GetDownloadUrlResponse {
    ok: bool,
    #[serde(default)]
    signed_download_url: String,
    #[serde(default)]
    matched_key: String,
}

#[derive(Serialize)]
struct CreateEntryRequest<'a> {
    key: &'a str,
    version: &'a str,
}

#[derive(Deserialize)]
struct CreateEntryResponse {
    ok: bool,
    #[serde(default)]
    signed_upload_url: String,
}

#[derive(Serialize)]
struct FinalizeRequest<'a> {
    key: &'a str,
    // int64 is a string in twirp's JSON mapping.
    size_bytes: String,
    version: &'a str,
}

#[derive(Deserialize)]
struct FinalizeResponse {
    ok: bool,
}

/// Client for the cache service reachable from inside a workflow run.
#[derive(Debug, Clone)]
struct CacheClient {
    http: Client,
    base_url: String,
    token: String,
}

impl CacheClient {
    fn from_env() -> Result<Self> {
        let base_url = env::var("ACTIONS_RESULTS_URL")
            .map_err(|_| Error::config("ENV ACTIONS_RESULTS_URL not set, not running in Github Actions?"))?;
        let token = env::var("ACTIONS_RUNTIME_TOKEN")
            .map_err(|_| Error::config("ENV ACTIONS_RUNTIME_TOKEN not set"))?;
        let http = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn rpc<Req: Serialize, Res: for<'de> Deserialize<'de>>(&self, method: &str, body: &Req) -> Result<Res> {
        let url = format!("{}/{CACHE_SERVICE}/{method}", self.base_url);
        Ok(self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()?
            .error_for_status()?
            .json()?)
    }

    /// Archive bytes of the newest entry matching `key` or `<key>-*`, if any.
    fn download(&self, key: &str, version: &str) -> Result<Option<(String, Vec<u8>)>> {
        let res: GetDownloadUrlResponse = self.rpc(
            "GetCacheEntryDownloadURL",
            &GetDownloadUrlRequest {
                key,
                restore_keys: vec![format!("{key}-")],
                version,
            },
        )?;
        if !res.ok || res.signed_download_url.is_empty() {
            return Ok(None);
        }
        let bytes = self
            .http
            .get(&res.signed_download_url)
            .send()?
            .error_for_status()?
            .bytes()?;
        Ok(Some((res.matched_key, bytes.to_vec())))
    }

    /// Returns false when the service refuses the entry (key already taken).
    fn upload(&self, key: &str, version: &str, archive: Vec<u8>) -> Result<bool> {
        let created: CreateEntryResponse =
            self.rpc("CreateCacheEntry", &CreateEntryRequest { key, version })?;
        if !created.ok || created.signed_upload_url.is_empty() {
            return Ok(false);
        }

        let size_bytes = archive.len().to_string();
        self.http
            .put(&created.signed_upload_url)
            .header("x-ms-blob-type", "BlockBlob")
            .body(archive)
            .send()?
            .error_for_status()?;

        let finalized: FinalizeResponse = self.rpc(
            "FinalizeCacheEntryUpload",
            &FinalizeRequest {
                key,
                size_bytes,
                version,
            },
        )?;
        Ok(finalized.ok)
    }
}

pub struct GaCacheHistoryProvider {
    local: LocalHistoryProvider,
    cache_key: String,
    version: String,
    client: CacheClient,
    restored: Mutex<bool>,
    // Keeps the directory alive for the provider's lifetime.
    _dir: TempDir,
}

impl GaCacheHistoryProvider {
    pub fn from_env(cache_key: &str) -> Result<Self> {
        let client = CacheClient::from_env()?;
        let dir = tempfile::Builder::new().prefix("ga-cache-download").tempdir()?;
        Ok(Self {
            local: LocalHistoryProvider::new(dir.path()),
            cache_key: cache_key.to_string(),
            version: cache_version(cache_key),
            client,
            restored: Mutex::new(false),
            _dir: dir,
        })
    }

    /// Restores the cache into the temp dir on first call only.
    fn initialize(&self) -> Result<()> {
        let mut restored = self.restored.lock();
        if *restored {
            return Ok(());
        }
        match self.client.download(&self.cache_key, &self.version)? {
            Some((matched_key, archive)) => {
                unpack_archive(&archive, self.local.dir())?;
                info!(key = %matched_key, "restored benchmark history from cache");
            }
            None => info!(key = %self.cache_key, "no cached benchmark history"),
        }
        *restored = true;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let archive = pack_archive(self.local.dir())?;
        let key = format!("{}-{}", self.cache_key, chrono::Utc::now().timestamp_millis());
        if self.client.upload(&key, &self.version, archive)? {
            info!(%key, "saved benchmark history to cache");
        } else {
            warn!(%key, "cache entry already exists, history not saved");
        }
        Ok(())
    }
}

impl HistoryProvider for GaCacheHistoryProvider {
    fn provider_info(&self) -> String {
        format!("GaCacheHistoryProvider, cacheKey: {}", self.cache_key)
    }

    fn read_latest_in_branch(&self, branch: &str) -> Result<Option<Benchmark>> {
        self.initialize()?;
        self.local.read_latest_in_branch(branch)
    }

    fn write_latest_in_branch(&self, branch: &str, benchmark: &Benchmark) -> Result<()> {
        self.initialize()?;
        self.local.write_latest_in_branch(branch, benchmark)?;
        self.save()
    }

    fn read_history(&self) -> Result<Vec<Benchmark>> {
        self.initialize()?;
        self.local.read_history()
    }

    fn read_history_commit(&self, commit_sha: &str) -> Result<Option<Benchmark>> {
        self.initialize()?;
        self.local.read_history_commit(commit_sha)
    }

    fn write_to_history(&self, benchmark: &Benchmark) -> Result<()> {
        self.initialize()?;
        self.local.write_to_history(benchmark)?;
        self.save()
    }
}

/// Cache entries are scoped by version: sha256 of `path|compression|salt`.
fn cache_version(path: &str) -> String {
    let digest = Sha256::digest([path, COMPRESSION_METHOD, VERSION_SALT].join("|").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn pack_archive(dir: &Path) -> Result<Vec<u8>> {
    let encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", dir)?;
    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn unpack_archive(archive: &[u8], dir: &Path) -> Result<()> {
    let decoder = zstd::Decoder::new(Cursor::new(archive))?;
    tar::Archive::new(decoder).unpack(dir)?;
    Ok(())
}
