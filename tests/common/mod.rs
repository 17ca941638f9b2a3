//! Shared fixtures for the HTTP integration tests.
//!
//! Each test gets its own temporary data root, static directory, species
//! mapping and shell stand-ins for the detection and tagging scripts.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use catrat::build_rocket;
use catrat::config::AppConfig;
use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;
use tempfile::TempDir;
use uuid::Uuid;

pub const BOUNDARY: &str = "catrat-test-boundary";

/// Copies every upload into the detection directory.
pub const DETECT_COPY: &str = r#"for f in "$CATRAT_UPLOAD_DIR"/*; do cp "$f" "$CATRAT_DETECT_DIR/"; done"#;

/// Files every detection output under the `vul` category.
pub const TAG_AS_FOX: &str =
    r#"mkdir -p "$CATRAT_TAGGED_DIR/vul" && cp "$CATRAT_DETECT_DIR"/* "$CATRAT_TAGGED_DIR/vul/""#;

pub struct TestApp {
    pub dir: TempDir,
    pub client: Client,
}

pub fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

pub fn test_config(root: &Path, detect: &str, tag: &str) -> AppConfig {
    let static_dir = root.join("static");
    fs::create_dir_all(&static_dir).unwrap();
    fs::write(static_dir.join("index.html"), "<h1>catrat</h1>").unwrap();
    fs::write(static_dir.join("catrat.html"), "<h1>review</h1>").unwrap();
    fs::write(static_dir.join("app.js"), "console.log('catrat')").unwrap();

    let species_mapping_path = root.join("species_mapping.json");
    fs::write(&species_mapping_path, r#"{ "vul": "Red fox", "bub": "Eagle-owl" }"#).unwrap();

    AppConfig {
        data_root: root.join("data"),
        static_dir,
        species_mapping_path,
        script_dir: root.to_path_buf(),
        detect_command: sh(detect),
        tag_command: sh(tag),
        ..AppConfig::default()
    }
}

impl TestApp {
    pub fn new(detect: &str, tag: &str) -> Self {
        Self::with_config(|_| {}, detect, tag)
    }

    pub fn with_config(adjust: impl FnOnce(&mut AppConfig), detect: &str, tag: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), detect, tag);
        adjust(&mut config);
        let client = Client::tracked(build_rocket(config)).expect("valid rocket instance");
        Self { dir, client }
    }

    pub fn job_dir(&self, job: Uuid) -> PathBuf {
        self.dir.path().join("data/jobs").join(job.to_string())
    }

    /// Posts the given `(filename, bytes)` pairs as `file` parts and returns
    /// the job id taken from the redirect.
    pub fn upload(&self, files: &[(&str, &[u8])]) -> Uuid {
        let parts: Vec<Part<'_>> = files
            .iter()
            .map(|(name, bytes)| Part {
                field: "file",
                filename: Some(*name),
                bytes: *bytes,
            })
            .collect();
        let response = self
            .client
            .post("/upload")
            .header(multipart_content_type())
            .body(multipart_body(&parts))
            .dispatch();
        assert_eq!(response.status(), Status::SeeOther);
        job_from_location(response.headers().get_one("Location").unwrap())
    }
}

pub struct Part<'a> {
    pub field: &'a str,
    pub filename: Option<&'a str>,
    pub bytes: &'a [u8],
}

pub fn multipart_content_type() -> ContentType {
    ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY))
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    part.field, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.field)
                    .as_bytes(),
            ),
        }
        body.extend_from_slice(part.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn job_from_location(location: &str) -> Uuid {
    let id = location
        .strip_prefix("/catrat?job=")
        .unwrap_or_else(|| panic!("unexpected redirect target {}", location));
    Uuid::parse_str(id).unwrap()
}

/// Sorted names of the entries directly inside `dir`.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
