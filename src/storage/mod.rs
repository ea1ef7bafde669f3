//! On-disk storage
//!
//! Materializes the metainfo file list under the output directory, scans
//! existing bytes to find already-verified pieces, and scatters verified
//! piece bytes across the files they span. Handles stay open for the life
//! of the process.

use std::io::SeekFrom;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use anyhow::Result;
use sha1::{Digest, Sha1};
use tokio::fs::{DirBuilder, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Error;
use crate::torrent::Metainfo;

/// A file's byte range within the concatenated torrent contents
#[derive(Debug, Clone)]
struct FileSpan {
    path: PathBuf,
    start: u64,
    len: u64,
}

/// Open files plus the geometry needed to place a piece
#[derive(Debug)]
pub struct Storage {
    spans: Vec<FileSpan>,
    files: Mutex<Vec<File>>,
    piece_length: u32,
}

impl Storage {
    /// Create directories (mode 0700) and files (mode 0600) under `root`,
    /// truncate each file to its declared size, and scan the existing
    /// bytes for already-complete pieces. Returns the storage and the
    /// initial pieces-set.
    pub async fn open(root: &Path, metainfo: &Metainfo) -> Result<(Self, Vec<bool>)> {
        let mut spans = Vec::new();
        let mut files = Vec::new();
        let mut offset = 0u64;

        for entry in &metainfo.files {
            let path = root.join(&entry.path);
            if entry.is_dir {
                DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(&path)
                    .await
                    .map_err(|e| {
                        Error::io_with_source(
                            format!("creating directory {}", path.display()),
                            e.to_string(),
                        )
                    })?;
                continue;
            }

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .mode(0o600)
                .open(&path)
                .await
                .map_err(|e| {
                    Error::io_with_source(format!("opening {}", path.display()), e.to_string())
                })?;
            file.set_len(entry.size).await.map_err(|e| {
                Error::io_with_source(
                    format!("truncating {} to {} bytes", path.display(), entry.size),
                    e.to_string(),
                )
            })?;

            spans.push(FileSpan {
                path,
                start: offset,
                len: entry.size,
            });
            offset += entry.size;
            files.push(file);
        }

        let pieces = scan_pieces(&mut files, &spans, metainfo).await?;
        info!(
            present = pieces.iter().filter(|&&p| p).count(),
            total = pieces.len(),
            "verified existing pieces on disk"
        );

        Ok((
            Self {
                spans,
                files: Mutex::new(files),
                piece_length: metainfo.piece_length,
            },
            pieces,
        ))
    }

    /// Write a verified piece at its absolute offset, splitting across the
    /// files it spans.
    pub async fn write_piece(&self, index: u32, data: &[u8]) -> Result<()> {
        let mut offset = u64::from(index) * u64::from(self.piece_length);
        let mut remaining = data;
        let mut files = self.files.lock().await;

        for (span, file) in self.spans.iter().zip(files.iter_mut()) {
            if remaining.is_empty() {
                break;
            }
            let end = span.start + span.len;
            if end <= offset {
                continue;
            }

            let take = std::cmp::min(remaining.len() as u64, end - offset) as usize;
            file.seek(SeekFrom::Start(offset - span.start))
                .await
                .map_err(|e| {
                    Error::io_with_source(
                        format!("seeking in {}", span.path.display()),
                        e.to_string(),
                    )
                })?;
            file.write_all(&remaining[..take]).await.map_err(|e| {
                Error::io_with_source(
                    format!("writing to {}", span.path.display()),
                    e.to_string(),
                )
            })?;
            file.flush().await.map_err(|e| {
                Error::io_with_source(
                    format!("flushing {}", span.path.display()),
                    e.to_string(),
                )
            })?;

            remaining = &remaining[take..];
            offset += take as u64;
        }

        if !remaining.is_empty() {
            return Err(Error::io(format!(
                "piece {} extends {} bytes past the declared file sizes",
                index,
                remaining.len()
            ))
            .into());
        }
        debug!(piece = index, len = data.len(), "piece written");
        Ok(())
    }
}

/// Read the concatenated file contents in piece-length chunks and flag
/// every chunk whose SHA-1 matches its expected hash. Short reads continue
/// into the next file until the chunk fills or the files run out; the
/// trailing partial chunk is hashed for the final piece.
async fn scan_pieces(
    files: &mut [File],
    spans: &[FileSpan],
    metainfo: &Metainfo,
) -> Result<Vec<bool>> {
    let mut pieces = vec![false; metainfo.piece_count()];
    let mut buf = vec![0u8; metainfo.piece_length as usize];
    let mut filled = 0usize;
    let mut index = 0usize;

    for (span, file) in spans.iter().zip(files.iter_mut()) {
        loop {
            let n = file.read(&mut buf[filled..]).await.map_err(|e| {
                Error::io_with_source(format!("reading {}", span.path.display()), e.to_string())
            })?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled == buf.len() {
                if index < pieces.len() && digest(&buf) == metainfo.piece_hashes[index] {
                    pieces[index] = true;
                }
                index += 1;
                filled = 0;
            }
        }
        // Rewind so later scatter writes see a clean cursor.
        file.seek(SeekFrom::Start(0)).await.map_err(|e| {
            Error::io_with_source(format!("rewinding {}", span.path.display()), e.to_string())
        })?;
    }

    if filled > 0 && index < pieces.len() && digest(&buf[..filled]) == metainfo.piece_hashes[index] {
        pieces[index] = true;
    }

    Ok(pieces)
}

fn digest(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}
