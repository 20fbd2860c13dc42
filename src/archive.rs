//! Unpacking of tar archives, gzip-compressed or not.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path};
use flate2::read::GzDecoder;
use tracing::{debug, info};
use crate::error::ArchiveError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn at(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + use<> {
    let path = path.to_path_buf();
    move |source| ArchiveError::Io { path, source }
}

/// Sniffs the gzip magic bytes and rewinds.
fn is_gzip(file: &mut File) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(err) => return Err(err),
    };
    file.seek(SeekFrom::Start(0))?;
    Ok(gzip)
}

/// Rejects entry paths that could land outside the destination.
pub fn check_entry_path(path: &Path) -> Result<(), ArchiveError> {
    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(())
    } else {
        Err(ArchiveError::UnsafePath(path.to_path_buf()))
    }
}

/// Unpacks a tar archive, gzip-compressed or not, into `dest`.
///
/// Every entry path is checked before anything is written for it; the first
/// unsafe one aborts the extraction. Returns the number of entries unpacked.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    let mut file = File::open(archive).map_err(at(archive))?;
    let gzip = is_gzip(&mut file).map_err(at(archive))?;
    let reader: Box<dyn Read> = if gzip {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    fs::create_dir_all(dest).map_err(at(dest))?;

    let mut tar = tar::Archive::new(reader);
    let mut count = 0;
    for entry in tar.entries().map_err(at(archive))? {
        let mut entry = entry.map_err(at(archive))?;
        let path = entry.path().map_err(at(archive))?.into_owned();
        check_entry_path(&path)?;
        debug!(entry = %path.display(), "unpacking");
        entry.unpack_in(dest).map_err(at(&dest.join(&path)))?;
        count += 1;
    }
    info!(archive = %archive.display(), dest = %dest.display(), entries = count, gzip, "unpacked archive");
    Ok(count)
}
