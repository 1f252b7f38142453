use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};
use crate::core::{Asset, Error, Result};

pub const DUMP_ENTRY: &str = "database.sql";
pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const MANIFEST_VERSION: u32 = 1;

/// Describes what an archive holds and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub tenant_id: u64,
    pub table_prefix: String,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tables: Vec<String>,
    pub assets: Vec<Asset>,
}

/// Write `dump` and the asset trees into a zip at `dest`.
///
/// Asset trees that do not exist on disk are skipped; the manifest lists
/// only what was actually packed.
pub fn write_archive(
    dest: &Path,
    dump: &Path,
    mut manifest: Manifest,
    asset_roots: &[(Asset, PathBuf)],
) -> Result<Manifest> {
    let file = File::create(dest)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(DUMP_ENTRY, options)?;
    io::copy(&mut File::open(dump)?, &mut zip)?;

    manifest.assets.clear();
    for (asset, root) in asset_roots {
        if !root.is_dir() {
            warn!("Skipping {}: {} is not a directory", asset.dir_name(), root.display());
            continue;
        }
        let files = add_tree(&mut zip, root, asset.dir_name(), options)?;
        debug!("Packed {} file(s) from {}", files, root.display());
        manifest.assets.push(*asset);
    }

    zip.start_file(MANIFEST_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    zip.finish()?;
    Ok(manifest)
}

fn add_tree<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    root: &Path,
    prefix: &str,
    options: FileOptions,
) -> Result<u64> {
    let mut count = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .map_err(|e| Error::Archive(e.to_string()))?;
            let name = format!(
                "{}/{}",
                prefix,
                relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            );
            zip.start_file(name, options)?;
            io::copy(&mut File::open(&path)?, zip)?;
            count += 1;
        }
    }
    Ok(count)
}

pub fn read_manifest(archive: &Path) -> Result<Manifest> {
    let mut zip = open(archive)?;
    let mut entry = zip
        .by_name(MANIFEST_ENTRY)
        .map_err(|e| Error::Archive(format!("{}: {}", MANIFEST_ENTRY, e)))?;
    let mut json = String::new();
    entry.read_to_string(&mut json)?;
    Ok(serde_json::from_str(&json)?)
}

/// An archive unpacked on disk.
#[derive(Debug, Clone)]
pub struct ExtractedArchive {
    pub root: PathBuf,
    pub manifest: Manifest,
}

impl ExtractedArchive {
    pub fn dump_path(&self) -> PathBuf {
        self.root.join(DUMP_ENTRY)
    }

    pub fn asset_dir(&self, asset: Asset) -> PathBuf {
        self.root.join(asset.dir_name())
    }
}

/// Unpack every entry under `dest`. Entries with paths escaping `dest` are
/// rejected.
pub fn extract(archive: &Path, dest: &Path) -> Result<ExtractedArchive> {
    let mut zip = open(archive)?;
    fs::create_dir_all(dest)?;

    for idx in 0..zip.len() {
        let mut entry = zip.by_index(idx)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::Archive(format!("Unsafe entry path '{}'", entry.name())))?;
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        io::copy(&mut entry, &mut File::create(&target)?)?;
    }

    let root = dest.to_path_buf();
    if !root.join(DUMP_ENTRY).is_file() {
        return Err(Error::Archive(format!("{} has no {}", archive.display(), DUMP_ENTRY)));
    }
    let manifest = serde_json::from_slice(&fs::read(root.join(MANIFEST_ENTRY)).map_err(|e| {
        Error::Archive(format!("{} has no readable {}: {}", archive.display(), MANIFEST_ENTRY, e))
    })?)?;
    Ok(ExtractedArchive { root, manifest })
}

fn open(archive: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(archive)
        .map_err(|e| Error::Validation(format!("Cannot open archive {}: {}", archive.display(), e)))?;
    Ok(ZipArchive::new(file)?)
}
