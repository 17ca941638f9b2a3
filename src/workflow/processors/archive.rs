//! Zip export of a job's tagged images.

use anyhow::{Context, Result};
use log::info;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::common::ARCHIVE_FILE_NAME;

/// Writes every file under `tagged_dir` into `<zip_dir>/tagged_images.zip`, named by
/// its path relative to `tagged_dir`, and returns the archive path.
///
/// An existing archive is replaced. Each build is assembled in its own temp
/// file next to it and renamed into place once complete, so concurrent builds
/// for the same job never write into the same file.
pub fn zip_tagged_images(tagged_dir: &Path, zip_dir: &Path) -> Result<PathBuf> {
    let start_time = Instant::now();
    fs::create_dir_all(zip_dir)
        .with_context(|| format!("Failed to create {}", zip_dir.display()))?;

    let zip_path = zip_dir.join(ARCHIVE_FILE_NAME);
    let tmp_path = zip_dir.join(format!(".{}-{}.tmp", ARCHIVE_FILE_NAME, Uuid::new_v4()));

    let result = write_archive(tagged_dir, &tmp_path)
        .and_then(|entries| {
            fs::rename(&tmp_path, &zip_path)
                .with_context(|| format!("Failed to move archive to {}", zip_path.display()))?;
            Ok(entries)
        });
    let entries = match result {
        Ok(entries) => entries,
        Err(err) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
    };

    info!(duration = &*format!("{:?}", start_time.elapsed());
        "Zipped {} tagged images into {}",
        entries,
        zip_path.display()
    );
    Ok(zip_path)
}

/// Writes the archive to `tmp_path` and returns the number of entries.
fn write_archive(tagged_dir: &Path, tmp_path: &Path) -> Result<usize> {
    let file = File::create(tmp_path)
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));

    let mut entries = 0usize;
    if tagged_dir.exists() {
        for entry in WalkDir::new(tagged_dir).sort_by_file_name() {
            let entry = entry.context("Failed to walk tagged directory")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = archive_name(tagged_dir, entry.path())?;
            writer
                .start_file(name.as_str(), SimpleFileOptions::default())
                .with_context(|| format!("Failed to start zip entry {}", name))?;
            let mut source = File::open(entry.path())
                .with_context(|| format!("Failed to open {}", entry.path().display()))?;
            std::io::copy(&mut source, &mut writer)
                .with_context(|| format!("Failed to write zip entry {}", name))?;
            entries += 1;
        }
    }

    let mut inner = writer.finish().context("Failed to finish zip archive")?;
    inner.flush()?;
    Ok(entries)
}

/// Entry name for `path`, relative to `root`, always `/` separated.
fn archive_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is not under {}", path.display(), root.display()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_archive(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut contents = BTreeMap::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            contents.insert(entry.name().to_string(), bytes);
        }
        contents
    }

    #[test]
    fn archive_reproduces_category_tree() {
        let root = tempfile::tempdir().unwrap();
        let tagged = root.path().join("tagged");
        fs::create_dir_all(tagged.join("cat1")).unwrap();
        fs::create_dir_all(tagged.join("cat2")).unwrap();
        fs::write(tagged.join("cat1/x.jpg"), b"jpeg bytes").unwrap();
        fs::write(tagged.join("cat2/y.png"), b"png bytes").unwrap();

        let zip_path = zip_tagged_images(&tagged, &root.path().join("zip-output")).unwrap();
        assert_eq!(zip_path.file_name().unwrap(), ARCHIVE_FILE_NAME);

        let contents = read_archive(&zip_path);
        assert_eq!(contents.len(), 2);
        assert_eq!(contents["cat1/x.jpg"], b"jpeg bytes");
        assert_eq!(contents["cat2/y.png"], b"png bytes");
    }

    #[test]
    fn rebuilding_overwrites_previous_archive() {
        let root = tempfile::tempdir().unwrap();
        let tagged = root.path().join("tagged");
        let zip_dir = root.path().join("zip-output");
        fs::create_dir_all(tagged.join("owl")).unwrap();
        fs::write(tagged.join("owl/old.jpg"), b"old").unwrap();
        zip_tagged_images(&tagged, &zip_dir).unwrap();

        fs::remove_file(tagged.join("owl/old.jpg")).unwrap();
        fs::write(tagged.join("owl/new.jpg"), b"new").unwrap();
        let zip_path = zip_tagged_images(&tagged, &zip_dir).unwrap();

        let contents = read_archive(&zip_path);
        assert_eq!(contents.keys().collect::<Vec<_>>(), vec!["owl/new.jpg"]);
        let leftovers: Vec<_> = fs::read_dir(&zip_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from(ARCHIVE_FILE_NAME)]);
    }

    #[test]
    fn concurrent_builds_each_produce_a_complete_archive() {
        let root = tempfile::tempdir().unwrap();
        let tagged = root.path().join("tagged");
        let zip_dir = root.path().join("zip-output");
        fs::create_dir_all(tagged.join("vul")).unwrap();
        let payload = vec![7u8; 20 * 1024];
        for i in 0..200 {
            fs::write(tagged.join(format!("vul/{:03}.jpg", i)), &payload).unwrap();
        }

        let (tagged, zip_dir) = (&tagged, &zip_dir);
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(move || {
                        for _ in 0..10 {
                            let zip_path = zip_tagged_images(tagged, zip_dir).unwrap();
                            assert_eq!(zip_path, zip_dir.join(ARCHIVE_FILE_NAME));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });

        let contents = read_archive(&zip_dir.join(ARCHIVE_FILE_NAME));
        assert_eq!(contents.len(), 200);
        assert!(contents.values().all(|bytes| bytes == &payload));
        assert_eq!(fs::read_dir(zip_dir).unwrap().count(), 1);
    }

    #[test]
    fn missing_tagged_directory_yields_empty_archive() {
        let root = tempfile::tempdir().unwrap();
        let zip_path =
            zip_tagged_images(&root.path().join("nothing"), &root.path().join("zip")).unwrap();
        assert!(read_archive(&zip_path).is_empty());
    }
}
