pub mod errors;

pub const VALID_IMAGE_EXTENSIONS: &'static [&'static str] = &[
    "bmp", "dng", "jpeg", "jpg", "mpo", "png", "tif", "tiff", "webp",
];

pub const UPLOAD_DIR_NAME: &str = "upload";
pub const DETECT_DIR_NAME: &str = "detect-results";
pub const TAGGED_DIR_NAME: &str = "tagged";
pub const ZIP_DIR_NAME: &str = "zip-output";
pub const JOBS_DIR_NAME: &str = "jobs";

pub const ARCHIVE_FILE_NAME: &str = "tagged_images.zip";

/// Share of the reported percentage that detection output accounts for.
/// Tagging progress is not measured.
pub const DETECTION_PROGRESS_WEIGHT: f64 = 50.0;

use std::sync::LazyLock;

use tokio::runtime::{Builder, Runtime};

pub static CURRENT_NUM_THREADS: LazyLock<usize> = LazyLock::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
});

// Rocket-specific Tokio Runtime
// Request handling and the external script children both live here.
pub static ROCKET_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(*CURRENT_NUM_THREADS)
        .thread_name("rocket-io-worker")
        .enable_all()
        .build()
        .expect("Failed to build Rocket Tokio runtime")
});
