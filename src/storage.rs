//! Object storage for the CDN origin.
//!
//! Everything daydream publishes (images, day records, the index) lives in
//! one S3-compatible bucket fronted by a CDN. Storage access is split into
//! two read capabilities:
//!
//! - **origin read** ([`ObjectStore::read_origin`]): a signed `GetObject`
//!   against the bucket itself. Always returns the latest written value.
//!   Anything consistency-sensitive (the `days.json` index) must use this.
//! - **public read** ([`ObjectStore::read_public`]): an unsigned GET against
//!   the CDN base URL. Cheap, but served from the edge cache and possibly
//!   stale.
//!
//! Writes ([`ObjectStore::put_object`]) are signed `PutObject` requests with
//! a `public-read` ACL and return the object's public CDN URL.
//!
//! # Authentication
//!
//! Requests are signed with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! using only pure-Rust dependencies (`hmac`, `sha2`).
//!
//! # Implementations
//!
//! | Type | Use |
//! |------|-----|
//! | [`S3Store`] | DigitalOcean Spaces, AWS S3, MinIO |
//! | [`MemoryStore`] | `--dry-run` and tests |

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{AddressingStyle, CdnConfig, CdnCredentials};

/// Key of the day index.
pub const INDEX_KEY: &str = "days.json";
/// Key of the "today" convenience snapshot.
pub const TODAY_KEY: &str = "today.json";

/// Key of the full record for `date` (`YYYY-MM-DD`).
pub fn day_key(date: &str) -> String {
    format!("days/{}.json", date)
}

// ═══════════════════════════════════════════════════════════════════════
// ObjectStore trait
// ═══════════════════════════════════════════════════════════════════════

/// Read/write access to the CDN origin bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `body` under `key` with public-read access. Returns the
    /// public URL.
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String>;

    /// Read `key` from the origin, bypassing any cache. `Ok(None)` when the
    /// object does not exist.
    async fn read_origin(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read `key` through the public CDN URL. May be stale.
    async fn read_public(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Public URL an object is served from.
    fn public_url(&self, key: &str) -> String;

    /// Upload a local file, guessing its content type from the extension.
    async fn upload_file(&self, path: &Path, key: &str) -> Result<String> {
        let body = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {} for upload", path.display()))?;
        self.put_object(key, body, detect_content_type(key)).await
    }
}

/// Detect MIME content type from a key's extension.
pub fn detect_content_type(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("png") => "image/png",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

// ═══════════════════════════════════════════════════════════════════════
// S3-compatible store
// ═══════════════════════════════════════════════════════════════════════

type HmacSha256 = Hmac<Sha256>;

/// Store backed by an S3-compatible bucket (DigitalOcean Spaces by default).
pub struct S3Store {
    client: reqwest::Client,
    config: CdnConfig,
    creds: CdnCredentials,
}

/// A request ready to send: target URL plus headers, `Authorization` included.
struct SignedRequest {
    url: String,
    headers: Vec<(String, String)>,
}

impl S3Store {
    pub fn new(client: reqwest::Client, config: CdnConfig, creds: CdnCredentials) -> Self {
        Self {
            client,
            config,
            creds,
        }
    }

    /// Store with a client that gives up after `cdn.timeout_secs`.
    pub fn from_config(config: CdnConfig, creds: CdnCredentials) -> Result<Self> {
        let client = Self::http_client(&config)?;
        Ok(Self::new(client, config, creds))
    }

    pub fn http_client(config: &CdnConfig) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?)
    }

    /// Sign a request for `key` per SigV4.
    ///
    /// `extra_headers` must use lowercase names; they are signed and sent.
    fn sign(
        &self,
        method: &str,
        key: &str,
        payload_hash: &str,
        extra_headers: &[(&str, &str)],
        now: DateTime<Utc>,
    ) -> SignedRequest {
        let (scheme, host, canonical_uri) = origin_location(&self.config, key);

        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        for (name, value) in extra_headers {
            headers.push((name.to_string(), value.trim().to_string()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        // reqwest derives Host from the URL.
        let mut send_headers: Vec<(String, String)> =
            headers.into_iter().filter(|(k, _)| k != "host").collect();
        send_headers.push(("authorization".to_string(), authorization));

        SignedRequest {
            url: format!("{}://{}{}", scheme, host, canonical_uri),
            headers: send_headers,
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        let payload_hash = hex_sha256(&body);
        let signed = self.sign(
            "PUT",
            key,
            &payload_hash,
            &[("content-type", content_type), ("x-amz-acl", "public-read")],
            Utc::now(),
        );

        let mut req = self.client.put(&signed.url).body(body);
        for (name, value) in &signed.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req.send().await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to put s3://{}/{}: {}",
                self.config.bucket,
                key,
                e
            )
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }

        debug!(key, "uploaded object");
        Ok(self.public_url(key))
    }

    async fn read_origin(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let payload_hash = hex_sha256(b"");
        let signed = self.sign("GET", key, &payload_hash, &[], Utc::now());

        let mut req = self.client.get(&signed.url);
        for (name, value) in &signed.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req.send().await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to get s3://{}/{}: {}",
                self.config.bucket,
                key,
                e
            )
        })?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", status, key);
        }

        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn read_public(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let url = self.public_url(key);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("GET {} failed (HTTP {})", url, resp.status());
        }

        Ok(Some(resp.bytes().await?.to_vec()))
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.config.base_url, key)
    }
}

// ============ AWS SigV4 Helpers ============

/// Split the configured endpoint into `(scheme, host, canonical_uri)` for
/// `key`, honouring the addressing style.
fn origin_location(config: &CdnConfig, key: &str) -> (String, String, String) {
    let (scheme, rest) = match config.endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme.to_string(), rest),
        None => ("https".to_string(), config.endpoint.as_str()),
    };
    let endpoint_host = rest.trim_end_matches('/');
    let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");

    match config.addressing_style {
        AddressingStyle::Virtual => (
            scheme,
            format!("{}.{}", config.bucket, endpoint_host),
            format!("/{}", encoded_key),
        ),
        AddressingStyle::Path => (
            scheme,
            endpoint_host.to_string(),
            format!("/{}/{}", uri_encode(&config.bucket), encoded_key),
        ),
    }
}

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
}

/// Process-local store. Origin and public reads see the same data.
///
/// Clones share the same objects.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    base_url: String,
}

impl MemoryStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            base_url: base_url.into(),
        }
    }

    /// Seed an object.
    pub fn with_object(self, key: &str, body: impl Into<Vec<u8>>) -> Self {
        self.insert(key, body.into(), detect_content_type(key));
        self
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).map(|o| o.body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|o| o.content_type.clone())
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn insert(&self, key: &str, body: Vec<u8>, content_type: &str) {
        self.lock().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        self.insert(key, body, content_type);
        Ok(self.public_url(key))
    }

    async fn read_origin(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key))
    }

    async fn read_public(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key))
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.base_url, key)
    }
}
