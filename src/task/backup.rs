//! Course backups as zip archives.
//!
//! The course is dumped through the course store into a temp dir, then the
//! dump is zipped to `<dest>/<course>-<unix secs>.zip`. An existing archive is
//! never overwritten; `-1`, `-2`, ... are appended instead.

use crate::services::CourseStore;
use crate::timestamp::Timestamp;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const DUMP_DIR_PREFIX: &str = "autograder-backup-";

/// Back up one course into `dest_dir`. Returns the archive path.
pub fn backup_course(
    store: &dyn CourseStore,
    course_id: &str,
    dest_dir: &Path,
    now: Timestamp,
) -> Result<PathBuf> {
    let dump = tempfile::Builder::new()
        .prefix(DUMP_DIR_PREFIX)
        .tempdir()
        .context("Failed to create backup temp dir")?;

    store
        .dump_course(course_id, dump.path())
        .with_context(|| format!("Failed to dump course '{course_id}'"))?;

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create backup dir {}", dest_dir.display()))?;

    let (path, file) = create_unique(dest_dir, &format!("{course_id}-{}", now.as_secs()))?;
    if let Err(e) = zip_dir(dump.path(), file) {
        fs::remove_file(&path).ok();
        return Err(e.context(format!("Failed to write backup {}", path.display())));
    }

    Ok(path)
}

/// Create `<base>.zip`, or the first free `<base>-N.zip`.
fn create_unique(dir: &Path, base: &str) -> Result<(PathBuf, File)> {
    let mut counter = 0u32;
    loop {
        let name = if counter == 0 {
            format!("{base}.zip")
        } else {
            format!("{base}-{counter}.zip")
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()))
            }
        }
    }
}

fn zip_dir(src: &Path, file: File) -> Result<()> {
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let name = relative.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut input = File::open(entry.path())
                .with_context(|| format!("Failed to open {}", entry.path().display()))?;
            io::copy(&mut input, &mut writer)?;
        }
    }

    writer.finish()?;
    Ok(())
}
