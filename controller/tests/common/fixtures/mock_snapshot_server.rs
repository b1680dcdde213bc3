//! Mock snapshot CDN serving a manifest and an archive

use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use super::test_data::sha256_hex;

pub const MANIFEST_PATH: &str = "/manifest.json";
pub const ARCHIVE_PATH: &str = "/snapshots/ironfish_snapshot.tar.gz";

pub struct MockSnapshotServer {
    pub server: MockServer,
    pub base_url: String,
}

impl MockSnapshotServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base_url = server.uri();
        Self { server, base_url }
    }

    pub fn manifest_url(&self) -> String {
        format!("{}{}", self.base_url, MANIFEST_PATH)
    }

    pub fn archive_url(&self) -> String {
        format!("{}{}", self.base_url, ARCHIVE_PATH)
    }

    /// Manifest describing `archive`, with its real checksum
    pub async fn mock_manifest_for(&self, archive: &[u8], database_version: u32) {
        self.mock_manifest(json!({
            "block_sequence": 412000,
            "file_size": archive.len(),
            "checksum": sha256_hex(archive),
            "database_version": database_version,
            "download_url": self.archive_url(),
            "timestamp": 1700000000
        }))
        .await;
    }

    pub async fn mock_manifest(&self, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(MANIFEST_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_manifest_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(MANIFEST_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_manifest_raw(&self, body: &str) {
        Mock::given(method("GET"))
            .and(path(MANIFEST_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_archive(&self, archive: &[u8]) {
        Mock::given(method("GET"))
            .and(path(ARCHIVE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.to_vec()))
            .mount(&self.server)
            .await;
    }
}
