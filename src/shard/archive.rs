//! Gzip-compressed tar archives of shard directories
//!
//! - Entries are added in sorted order so equal trees give equal archives
//! - Paths are relative to the archived directory; top-level entries are
//!   the per-document environments
//! - The archive is fsynced before it is handed on

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use super::errors::{ShardError, ShardResult};

/// Archives the contents of `source_dir` into `output_path`.
pub fn create_archive(source_dir: &Path, output_path: &Path) -> ShardResult<()> {
    let file = File::create(output_path).map_err(|e| {
        ShardError::archive(
            format!("Failed to create archive file: {}", output_path.display()),
            e,
        )
    })?;

    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);

    let mut entries = Vec::new();
    collect_entries(source_dir, "", &mut entries)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for (archive_path, fs_path) in entries {
        if fs_path.is_dir() {
            builder.append_dir(&archive_path, &fs_path).map_err(|e| {
                ShardError::archive(format!("Failed to add directory: {}", archive_path), e)
            })?;
        } else {
            let mut file =
                File::open(&fs_path).map_err(|e| ShardError::io_error_at_path(&fs_path, e))?;
            builder.append_file(&archive_path, &mut file).map_err(|e| {
                ShardError::archive(format!("Failed to add file: {}", archive_path), e)
            })?;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| ShardError::archive("Failed to finish archive", e))?;
    let mut writer = encoder
        .finish()
        .map_err(|e| ShardError::archive("Failed to finish compression", e))?;
    writer
        .flush()
        .map_err(|e| ShardError::archive("Failed to flush archive buffer", e))?;
    let file = writer
        .into_inner()
        .map_err(|e| ShardError::archive("Failed to flush archive buffer", e.into_error()))?;

    file.sync_all().map_err(|e| {
        ShardError::archive(format!("Failed to fsync archive: {}", output_path.display()), e)
    })?;
    Ok(())
}

fn collect_entries(
    current_dir: &Path,
    prefix: &str,
    entries: &mut Vec<(String, PathBuf)>,
) -> ShardResult<()> {
    let dir_entries = fs::read_dir(current_dir)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| ShardError::io_error_at_path(current_dir, e))?;

    for entry in dir_entries {
        let fs_path = entry.path();
        let file_name = entry.file_name();
        let archive_path = if prefix.is_empty() {
            file_name.to_string_lossy().to_string()
        } else {
            format!("{}/{}", prefix, file_name.to_string_lossy())
        };

        entries.push((archive_path.clone(), fs_path.clone()));
        if fs_path.is_dir() {
            collect_entries(&fs_path, &archive_path, entries)?;
        }
    }
    Ok(())
}

/// Unpacks `archive_path` into `dest_dir`.
pub fn extract_archive(archive_path: &Path, dest_dir: &Path) -> ShardResult<()> {
    let file = File::open(archive_path).map_err(|e| {
        ShardError::archive(
            format!("Failed to open archive: {}", archive_path.display()),
            e,
        )
    })?;

    Archive::new(GzDecoder::new(file))
        .unpack(dest_dir)
        .map_err(|e| {
            ShardError::archive(
                format!("Failed to extract archive: {}", archive_path.display()),
                e,
            )
        })
}

/// Removes a file if present. Failures are ignored.
pub fn remove_file_quietly(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

/// Removes a directory tree if present. Failures are ignored.
pub fn remove_dir_quietly(path: &Path) {
    if path.exists() {
        let _ = fs::remove_dir_all(path);
    }
}
