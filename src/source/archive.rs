//! Deterministic source archives.
//!
//! A checked-out tree is packed as a gzip-compressed tar with every entry
//! nested under `app/`. Entries are sorted by name, carry mtime 0, uid/gid 0
//! and fixed modes (0755 for directories and executables, 0644 otherwise), so
//! packing the same commit twice yields byte-identical archives. The resolved
//! commit id is stored as the gzip header comment, which lets a reused archive
//! report its commit without another clone.

use anyhow::{Context, Result, anyhow};
use flate2::Compression;
use flate2::GzBuilder;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use crate::constants::ARCHIVE_PREFIX;
use crate::utils::fs::publish_with;

/// Pack `tree` (excluding its top-level `.git`) into an archive at `dest`.
///
/// The archive is published atomically; on failure nothing appears at `dest`.
pub fn write_archive(tree: &Path, dest: &Path, commit: &str) -> Result<()> {
    publish_with(dest, |file| {
        let encoder = GzBuilder::new().comment(commit.as_bytes()).write(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        let mut header = directory_header();
        builder.append_data(&mut header, ARCHIVE_PREFIX, io::empty())?;

        let walker = walkdir::WalkDir::new(tree)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.depth() == 1 && e.file_name() == ".git"));

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to walk {}", tree.display()))?;
            let rel = entry.path().strip_prefix(tree).context("failed to relativize path")?;
            let name = archive_name(rel)?;
            let metadata = fs::symlink_metadata(entry.path())
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
            let file_type = metadata.file_type();

            if file_type.is_dir() {
                let mut header = directory_header();
                builder.append_data(&mut header, &name, io::empty())?;
            } else if file_type.is_file() {
                let mut header = base_header(tar::EntryType::Regular);
                header.set_mode(if is_executable(&metadata) { 0o755 } else { 0o644 });
                header.set_size(metadata.len());
                let reader = File::open(entry.path())
                    .with_context(|| format!("Failed to open {}", entry.path().display()))?;
                builder.append_data(&mut header, &name, reader)?;
            } else if file_type.is_symlink() {
                let target = fs::read_link(entry.path())
                    .with_context(|| format!("Failed to read symlink {}", entry.path().display()))?;
                let mut header = base_header(tar::EntryType::Symlink);
                header.set_mode(0o777);
                builder.append_link(&mut header, &name, &target)?;
            } else {
                tracing::debug!("Skipping special file {} while archiving", entry.path().display());
            }
        }

        let encoder = builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    })
}

/// Read an archive end to end, returning the commit recorded in its header.
///
/// Fails if the archive is truncated or not a gzip tar, so a corrupt file is
/// never handed out as a complete archive.
pub fn verify_archive(path: &Path) -> Result<Option<String>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    for entry in archive.entries()? {
        let mut entry = entry?;
        io::copy(&mut entry, &mut io::sink())?;
    }
    let mut decoder = archive.into_inner();
    // Drain padding and the gzip trailer so the CRC is checked.
    io::copy(&mut decoder, &mut io::sink())?;

    Ok(decoder
        .header()
        .and_then(|h| h.comment())
        .map(|c| String::from_utf8_lossy(c).into_owned()))
}

/// Extract an archive into `dest`.
///
/// Entries that would land outside `dest` are rejected by the tar crate.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file =
        File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_permissions(false);
    tar.set_overwrite(true);
    tar.unpack(dest)
        .with_context(|| format!("Failed to extract {} to {}", archive.display(), dest.display()))
}

/// The directory a fetched tree was packed from, inside an extraction root.
pub fn source_root(extracted: &Path) -> PathBuf {
    let nested = extracted.join(ARCHIVE_PREFIX);
    if nested.is_dir() { nested } else { extracted.to_path_buf() }
}

fn base_header(entry_type: tar::EntryType) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(0);
    header
}

fn directory_header() -> tar::Header {
    let mut header = base_header(tar::EntryType::Directory);
    header.set_mode(0o755);
    header
}

fn archive_name(rel: &Path) -> Result<String> {
    let mut name = String::from(ARCHIVE_PREFIX);
    for component in rel.components() {
        match component {
            std::path::Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| anyhow!("Non UTF-8 path in tree: {}", rel.display()))?;
                name.push('/');
                name.push_str(part);
            }
            _ => return Err(anyhow!("Unexpected path component in {}", rel.display())),
        }
    }
    Ok(name)
}

fn is_executable(metadata: &fs::Metadata) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        false
    }
}
