//! Test helpers: build a fresh gateway over a temp storage root.

#![allow(dead_code)]

use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use upload_gateway::services::upload_service::UploadLimits;
use upload_gateway::{AppState, build_app};

pub const USER_HEADER: &str = "x-user-id";
pub const FIVE_MIB: u64 = 5 * 1024 * 1024;

/// Test application: server, state, and the storage root it owns.
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    pub fn storage_root(&self) -> &Path {
        self.dir.path()
    }

    /// Files currently in the storage root, temp files included.
    pub fn stored_file_count(&self) -> usize {
        std::fs::read_dir(self.dir.path())
            .expect("storage root should be readable")
            .count()
    }
}

pub fn setup_test_app() -> TestApp {
    setup_test_app_with(FIVE_MIB, false)
}

pub fn setup_test_app_with(max_bytes: u64, conceal_foreign_files: bool) -> TestApp {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let limits = UploadLimits {
        max_bytes,
        read_timeout: Duration::from_secs(10),
    };
    let state = AppState::new(dir.path(), limits, conceal_foreign_files);
    let server = TestServer::new(build_app(state.clone()).into_make_service())
        .expect("Failed to create test server");

    TestApp { server, state, dir }
}

/// PNG magic followed by `payload_len` filler bytes.
pub fn png_bytes(payload_len: usize) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend(std::iter::repeat_n(0x42, payload_len));
    data
}

pub fn file_form(filename: &str, data: Vec<u8>) -> MultipartForm {
    let part = Part::bytes(bytes::Bytes::from(data)).file_name(filename.to_string());
    MultipartForm::new().add_part("file", part)
}

/// Upload as `user` and return the raw response.
pub async fn upload(
    client: &TestServer,
    user: &str,
    filename: &str,
    data: Vec<u8>,
) -> axum_test::TestResponse {
    client
        .post("/upload")
        .add_header(USER_HEADER, user)
        .multipart(file_form(filename, data))
        .await
}

/// Upload as `user`, assert success, and return the new id.
pub async fn upload_ok(client: &TestServer, user: &str, filename: &str, data: Vec<u8>) -> String {
    let response = upload(client, user, filename, data).await;
    assert_eq!(response.status_code(), 200, "upload should succeed");
    let body: serde_json::Value = response.json();
    body["id"]
        .as_str()
        .expect("Upload response should contain id")
        .to_string()
}
