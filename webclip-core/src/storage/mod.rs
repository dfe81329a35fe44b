use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::config::StorageSection;

type HmacSha256 = Hmac<Sha256>;

const SIGNED_HEADERS: &str = "content-type;host;x-amz-content-sha256;x-amz-date";

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage endpoint returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Reference to an uploaded artifact, returned to the caller instead of
/// the raw bytes when remote delivery is engaged.
#[derive(Debug, Clone, Serialize)]
pub struct StoredObject {
    pub url: String,
    pub bucket: String,
    #[serde(rename = "type")]
    pub mime: String,
    pub name: String,
    pub size: u64,
}

/// Minimal S3-compatible client: bucket-scoped object PUT with SigV4
/// request signing. Nothing else is needed by the gateway.
pub struct ObjectStore {
    endpoint: String,
    access_key: String,
    secret_key: String,
    region: String,
    use_ssl: bool,
    client: Client,
}

impl ObjectStore {
    pub fn new(section: &StorageSection) -> StorageResult<Self> {
        let client = Client::builder()
            .user_agent("webclip-gateway/0.1")
            .build()?;
        Ok(Self {
            endpoint: section.endpoint.clone(),
            access_key: section.access_key.clone(),
            secret_key: section.secret_key.clone(),
            region: section.region.clone(),
            use_ssl: section.use_ssl,
            client,
        })
    }

    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        mime: &str,
    ) -> StorageResult<StoredObject> {
        let now = Utc::now();
        let canonical_uri = canonical_uri(bucket, key);
        let payload_hash = hex::encode(Sha256::digest(bytes));
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let authorization = self.authorization_header(
            &canonical_uri,
            mime,
            &payload_hash,
            now,
        );

        let url = self.object_url(&canonical_uri);
        debug!(%url, size = bytes.len(), "uploading artifact");
        let response = self
            .client
            .put(&url)
            .header("content-type", mime)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .header("authorization", authorization)
            .body(bytes.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::UnexpectedStatus { status, body });
        }

        let name = key.rsplit('/').next().unwrap_or(key).to_string();
        Ok(StoredObject {
            url,
            bucket: bucket.to_string(),
            mime: mime.to_string(),
            name,
            size: bytes.len() as u64,
        })
    }

    fn object_url(&self, canonical_uri: &str) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}{canonical_uri}", self.endpoint)
    }

    fn authorization_header(
        &self,
        canonical_uri: &str,
        mime: &str,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> String {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let canonical_request = format!(
            "PUT\n{canonical_uri}\n\ncontent-type:{mime}\nhost:{}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{payload_hash}",
            self.endpoint
        );
        let scope = format!("{date}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let mut key = hmac_sha256(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes());
        key = hmac_sha256(&key, self.region.as_bytes());
        key = hmac_sha256(&key, b"s3");
        key = hmac_sha256(&key, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            self.access_key
        )
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_uri(bucket: &str, key: &str) -> String {
    let mut uri = format!("/{}", uri_encode(bucket));
    for segment in key.split('/') {
        uri.push('/');
        uri.push_str(&uri_encode(segment));
    }
    uri
}

/// Percent-encodes one path segment per the SigV4 rules: unreserved
/// characters pass through, everything else becomes %XX.
fn uri_encode(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(use_ssl: bool) -> ObjectStore {
        ObjectStore::new(&StorageSection {
            endpoint: "minio.example.com".into(),
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "secret".into(),
            region: "us-east-1".into(),
            use_ssl,
        })
        .expect("client builds")
    }

    #[test]
    fn object_url_follows_tls_flag() {
        let uri = canonical_uri("media", "clips/out.pdf");
        assert_eq!(
            store(true).object_url(&uri),
            "https://minio.example.com/media/clips/out.pdf"
        );
        assert_eq!(
            store(false).object_url(&uri),
            "http://minio.example.com/media/clips/out.pdf"
        );
    }

    #[test]
    fn uri_encoding_preserves_unreserved_characters() {
        assert_eq!(uri_encode("shot-01.png"), "shot-01.png");
        assert_eq!(uri_encode("a b"), "a%20b");
        assert_eq!(uri_encode("ünicode"), "%C3%BCnicode");
        assert_eq!(canonical_uri("bucket", "sub dir/name.png"), "/bucket/sub%20dir/name.png");
    }

    #[test]
    fn authorization_header_has_sigv4_shape() {
        let now = DateTime::parse_from_rfc3339("2026-01-15T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let header = store(true).authorization_header(
            "/bucket/name.png",
            "image/png",
            &hex::encode(Sha256::digest(b"payload")),
            now,
        );
        assert!(header.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260115/us-east-1/s3/aws4_request"
        ));
        assert!(header.contains(&format!("SignedHeaders={SIGNED_HEADERS}")));
        let signature = header.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signing_is_deterministic_for_fixed_inputs() {
        let now = DateTime::parse_from_rfc3339("2026-01-15T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let store = store(true);
        let a = store.authorization_header("/bucket/name.png", "image/png", "abc", now);
        let b = store.authorization_header("/bucket/name.png", "image/png", "abc", now);
        assert_eq!(a, b);
    }
}
