use crate::config::InstallConfig;
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;

/// Read-only view of an npm-compatible registry.
pub trait Registry: Send + Sync {
    /// `GET /<name>`: dist-tags and every published version.
    fn package_metadata(&self, name: &str) -> Result<NpmMetadata>;
    /// `GET /<name>/<version>`: a single version manifest.
    fn version_manifest(&self, name: &str, version: &str) -> Result<NpmVersion>;
    /// Download a tarball, reporting `(loaded, total)` as bytes arrive.
    fn download_tarball(
        &self,
        url: &str,
        on_progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<Vec<u8>>;
}

#[derive(Debug)]
pub struct HttpRegistry {
    registry: String,
    client: Client,
    max_tarball_size: u64,
    meta_cache: Mutex<HashMap<String, NpmMetadata>>,
}

impl HttpRegistry {
    pub fn new(config: &InstallConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("nestpm/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            registry: config.registry.trim_end_matches('/').to_string(),
            client,
            max_tarball_size: config.max_tarball_size,
            meta_cache: Mutex::new(HashMap::new()),
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let resp = self.client.get(url).send().with_context(|| format!("GET {url}"))?;
        if !resp.status().is_success() {
            bail!("registry returned {} for {}", resp.status(), what);
        }
        resp.json().with_context(|| format!("decode registry response for {what}"))
    }
}

/// Scoped names travel as `@scope%2Fname`.
fn encode_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replacen('/', "%2F", 1)
    } else {
        name.to_string()
    }
}

impl Registry for HttpRegistry {
    fn package_metadata(&self, name: &str) -> Result<NpmMetadata> {
        if let Some(hit) = self.meta_cache.lock().get(name).cloned() {
            return Ok(hit);
        }
        let url = format!("{}/{}", self.registry, encode_name(name));
        let meta: NpmMetadata = self.get_json(&url, name)?;
        self.meta_cache.lock().insert(name.to_string(), meta.clone());
        Ok(meta)
    }

    fn version_manifest(&self, name: &str, version: &str) -> Result<NpmVersion> {
        // The per-version endpoint is not served for scoped packages.
        if name.starts_with('@') || self.meta_cache.lock().contains_key(name) {
            let meta = self.package_metadata(name)?;
            return meta
                .versions
                .get(version)
                .cloned()
                .with_context(|| format!("{name}@{version} is not published"));
        }
        let url = format!("{}/{}/{}", self.registry, encode_name(name), version);
        self.get_json(&url, &format!("{name}@{version}"))
    }

    fn download_tarball(
        &self,
        url: &str,
        on_progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<Vec<u8>> {
        let mut resp = self.client.get(url).send().with_context(|| format!("GET {url}"))?;
        if !resp.status().is_success() {
            bail!("tarball fetch {} status {}", url, resp.status());
        }
        let total = resp.content_length();
        if total.is_some_and(|t| t > self.max_tarball_size) {
            bail!("tarball too large: {} bytes (max: {})", total.unwrap_or_default(), self.max_tarball_size);
        }
        let mut bytes = Vec::with_capacity(total.unwrap_or(0) as usize);
        let mut buf = [0u8; 64 * 1024];
        on_progress(0, total);
        loop {
            let n = resp.read(&mut buf).with_context(|| format!("read {url}"))?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&buf[..n]);
            if bytes.len() as u64 > self.max_tarball_size {
                bail!("tarball too large: more than {} bytes", self.max_tarball_size);
            }
            on_progress(bytes.len() as u64, total);
        }
        Ok(bytes)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NpmMetadata {
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: HashMap<String, NpmVersion>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NpmVersion {
    #[serde(default)]
    pub version: String,
    pub dist: NpmDist,
    #[serde(default, deserialize_with = "crate::manifest::string_map")]
    pub dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NpmDist {
    pub tarball: String,
    #[serde(default)]
    pub integrity: Option<String>,
}
