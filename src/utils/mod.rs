pub mod fs_utils;

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

use crate::common::VALID_IMAGE_EXTENSIONS;

static REGEX_UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

/// Accepts a filename when the lowercased text after its last `.` is an allowed
/// image extension.
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            VALID_IMAGE_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Reduces a client supplied filename to a flat, ASCII-only name safe to join
/// onto an upload directory. Accented letters are decomposed first so they keep
/// their base letter. May return an empty string.
pub fn secure_filename(filename: &str) -> String {
    let flattened: String = filename
        .nfkd()
        .filter(|c| c.is_ascii())
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    REGEX_UNSAFE_FILENAME_CHARS
        .replace_all(&joined, "")
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}
