//! Zip archives of one persisted area.
//!
//! Entry names are relative to the area's base path, so an archive of
//! `/minetest/worlds` holds `w1/map.sqlite`, not the absolute path, and can
//! be restored under a different root.

use std::io::{Read, Seek, Write};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::FileRecord;

/// Archive error type.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry name that would land outside the area.
    #[error("unsafe entry name: {0}")]
    UnsafeEntry(String),

    /// A record outside the area being archived.
    #[error("{path} is not under {base}")]
    OutsideArea { path: String, base: String },
}

/// One file read back from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path relative to the area base, `/`-separated.
    pub name: String,
    pub content: Vec<u8>,
}

/// Write `records` (all under `base`) into a zip, sorted by path.
pub fn write_archive<W: Write + Seek>(
    writer: W,
    base: &str,
    records: &[FileRecord],
) -> Result<W, ArchiveError> {
    let prefix = format!("{}/", base.trim_end_matches('/'));
    let mut sorted: Vec<&FileRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(writer);
    for record in sorted {
        let name = record
            .path
            .strip_prefix(&prefix)
            .ok_or_else(|| ArchiveError::OutsideArea {
                path: record.path.clone(),
                base: base.to_string(),
            })?;
        zip.start_file(name, options)?;
        zip.write_all(&record.content)?;
    }
    Ok(zip.finish()?)
}

/// Read every file entry of a zip. Directory entries are skipped; names that
/// are absolute or contain `..` are rejected.
pub fn read_archive<R: Read + Seek>(reader: R) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = ZipArchive::new(reader)?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.is_dir() {
            continue;
        }
        let name = checked_name(file.name())?;
        let mut content = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut content)?;
        entries.push(ArchiveEntry { name, content });
    }
    Ok(entries)
}

fn checked_name(raw: &str) -> Result<String, ArchiveError> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(ArchiveError::UnsafeEntry(raw.to_string()));
    }
    let mut segments = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(ArchiveError::UnsafeEntry(raw.to_string())),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(ArchiveError::UnsafeEntry(raw.to_string()));
    }
    Ok(segments.join("/"))
}
