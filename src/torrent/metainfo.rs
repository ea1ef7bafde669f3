//! Metainfo model
//!
//! Validates the parsed metainfo dictionary into the piece table and the
//! ordered on-disk file layout, and extracts the tracker URL list.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use crate::bencode::Value;
use crate::error::Error;

/// One entry of the on-disk layout, in creation order.
///
/// Directory entries (`is_dir`, size 0) precede the files beneath them. A
/// single-file torrent has exactly one file entry; a multi-file torrent
/// starts with the enclosing directory named after the torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub is_dir: bool,
    pub path: PathBuf,
    pub size: u64,
}

/// Parsed and validated torrent metadata. Never mutated after parse.
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub name: String,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_size: u64,
    pub files: Vec<FileEntry>,
}

impl Metainfo {
    /// Build the metainfo from the top-level bencode dictionary
    pub fn from_dict(root: &BTreeMap<Vec<u8>, Value>) -> Result<Self> {
        let info = root
            .get(b"info".as_slice())
            .and_then(Value::as_dict)
            .ok_or_else(|| Error::config("metainfo has no info entry of type dictionary"))?;

        let pieces = info
            .get(b"pieces".as_slice())
            .and_then(Value::as_bytes)
            .ok_or_else(|| Error::config("info has no pieces entry of type string"))?;
        if pieces.len() % 20 != 0 {
            return Err(Error::config("pieces string is not a multiple of 20").into());
        }
        let piece_hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let piece_length = info
            .get(b"piece length".as_slice())
            .and_then(Value::as_int)
            .ok_or_else(|| Error::config("info has no piece length entry of type integer"))?;
        let piece_length = u32::try_from(piece_length)
            .map_err(|_| Error::config("piece length does not fit in a 32-bit unsigned integer"))?;
        if piece_length == 0 {
            return Err(Error::config("piece length is zero").into());
        }

        let name = info
            .get(b"name".as_slice())
            .and_then(Value::as_str)
            .ok_or_else(|| Error::config("info has no name entry of type string"))?
            .to_string();

        let single = info.get(b"length".as_slice()).and_then(Value::as_int);
        let multi = info.get(b"files".as_slice()).and_then(Value::as_list);
        let (total_size, files) = match (single, multi) {
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "info has both a length entry and a files entry",
                )
                .into())
            }
            (None, None) => {
                return Err(Error::config(
                    "info has no length entry of type integer and no files entry of type list",
                )
                .into())
            }
            (Some(length), None) => Self::single_file_layout(&name, length)?,
            (None, Some(list)) => Self::multi_file_layout(&name, list)?,
        };

        let expected = total_size.div_ceil(u64::from(piece_length)) as usize;
        if piece_hashes.len() != expected {
            return Err(Error::config(format!(
                "pieces string holds {} hashes, total size needs {}",
                piece_hashes.len(),
                expected
            ))
            .into());
        }

        debug!(
            %name,
            piece_length,
            pieces = piece_hashes.len(),
            total_size,
            "parsed metainfo"
        );
        Ok(Self {
            name,
            piece_length,
            piece_hashes,
            total_size,
            files,
        })
    }

    fn single_file_layout(name: &str, length: i64) -> Result<(u64, Vec<FileEntry>)> {
        let size = u64::try_from(length)
            .map_err(|_| Error::config("length entry is negative"))?;
        let entry = FileEntry {
            is_dir: false,
            path: PathBuf::from(name),
            size,
        };
        Ok((size, vec![entry]))
    }

    fn multi_file_layout(name: &str, list: &[Value]) -> Result<(u64, Vec<FileEntry>)> {
        let root = PathBuf::from(name);
        let mut files = vec![FileEntry {
            is_dir: true,
            path: root.clone(),
            size: 0,
        }];
        let mut total = 0u64;

        for (i, entry) in list.iter().enumerate() {
            let dict = entry
                .as_dict()
                .ok_or_else(|| Error::config(format!("files entry {} is not a dictionary", i)))?;
            let length = dict
                .get(b"length".as_slice())
                .and_then(Value::as_int)
                .ok_or_else(|| {
                    Error::config(format!("files entry {} has no length entry of type integer", i))
                })?;
            let size = u64::try_from(length)
                .map_err(|_| Error::config(format!("files entry {} has a negative length", i)))?;
            let components = dict
                .get(b"path".as_slice())
                .and_then(Value::as_list)
                .ok_or_else(|| {
                    Error::config(format!("files entry {} has no path entry of type list", i))
                })?;
            if components.is_empty() {
                return Err(Error::config(format!("files entry {} has an empty path", i)).into());
            }

            let mut path = root.clone();
            for (k, component) in components.iter().enumerate() {
                let part = component.as_str().ok_or_else(|| {
                    Error::config(format!("path component {} of files entry {} is not a string", k, i))
                })?;
                path.push(part);
            }
            if components.len() > 1 {
                files.push(FileEntry {
                    is_dir: true,
                    path: path.parent().map(PathBuf::from).unwrap_or_else(|| root.clone()),
                    size: 0,
                });
            }
            total += size;
            files.push(FileEntry {
                is_dir: false,
                path,
                size,
            });
        }

        Ok((total, files))
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Length of a given piece; the final piece may be short
    pub fn piece_len(&self, index: u32) -> u32 {
        if index as usize == self.piece_count().saturating_sub(1) {
            let rem = (self.total_size % u64::from(self.piece_length)) as u32;
            if rem != 0 {
                return rem;
            }
        }
        self.piece_length
    }
}

impl fmt::Display for Metainfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "piece length: {} bytes", self.piece_length)?;
        writeln!(f, "number of pieces: {}", self.piece_count())?;
        writeln!(f, "total size: {} bytes", self.total_size)?;
        for entry in &self.files {
            if entry.is_dir {
                continue;
            }
            writeln!(f, "{} ({} bytes)", entry.path.display(), entry.size)?;
        }
        Ok(())
    }
}

/// Collect the tracker URLs: `announce` first, then the flattened
/// `announce-list`. Entries that are not string lists are skipped, matching
/// the forgiving reading trackers get in the wild.
pub fn tracker_urls(root: &BTreeMap<Vec<u8>, Value>) -> Result<Vec<String>> {
    let announce = root.get(b"announce".as_slice()).and_then(Value::as_str);
    let tiers = root.get(b"announce-list".as_slice()).and_then(Value::as_list);
    if announce.is_none() && tiers.is_none() {
        return Err(Error::config(
            "metainfo has no announce entry of type string and no announce-list entry of type list",
        )
        .into());
    }

    let mut urls = Vec::new();
    if let Some(url) = announce {
        urls.push(url.to_string());
    }
    for tier in tiers.unwrap_or_default() {
        let Some(tier) = tier.as_list() else { continue };
        for url in tier {
            let Some(url) = url.as_str() else { continue };
            if !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode;

    fn parse(input: &[u8]) -> Result<Metainfo> {
        let root = bencode::parse_dict(input).unwrap();
        Metainfo::from_dict(&root)
    }

    fn pieces_entry(count: usize) -> String {
        format!("6:pieces{}:{}", count * 20, "x".repeat(count * 20))
    }

    #[test]
    fn test_single_file() {
        let input = format!(
            "d4:infod6:lengthi16384e4:name4:file12:piece lengthi16384e{}ee",
            pieces_entry(1)
        );
        let m = parse(input.as_bytes()).unwrap();
        assert_eq!(m.total_size, 16384);
        assert_eq!(m.piece_count(), 1);
        assert_eq!(
            m.files,
            vec![FileEntry {
                is_dir: false,
                path: PathBuf::from("file"),
                size: 16384,
            }]
        );
    }

    #[test]
    fn test_multi_file_layout() {
        let input = format!(
            "d4:infod5:filesld6:lengthi10000e4:pathl1:aeed6:lengthi10000e4:pathl3:sub1:beee4:name4:dest12:piece lengthi16384e{}ee",
            pieces_entry(2)
        );
        let m = parse(input.as_bytes()).unwrap();
        assert_eq!(m.total_size, 20000);
        assert_eq!(m.files.len(), 4);
        assert!(m.files[0].is_dir);
        assert_eq!(m.files[0].path, PathBuf::from("dest"));
        assert_eq!(m.files[1].path, PathBuf::from("dest/a"));
        assert_eq!(m.files[1].size, 10000);
        assert!(m.files[2].is_dir);
        assert_eq!(m.files[2].path, PathBuf::from("dest/sub"));
        assert_eq!(m.files[3].path, PathBuf::from("dest/sub/b"));
    }

    #[test]
    fn test_last_piece_length() {
        let input = format!(
            "d4:infod5:filesld6:lengthi10000e4:pathl1:aeed6:lengthi10000e4:pathl1:beee4:name4:dest12:piece lengthi16384e{}ee",
            pieces_entry(2)
        );
        let m = parse(input.as_bytes()).unwrap();
        assert_eq!(m.piece_len(0), 16384);
        assert_eq!(m.piece_len(1), 3616);
    }

    #[test]
    fn test_rejects_bad_pieces_string() {
        let input = "d4:infod6:lengthi16384e4:name4:file12:piece lengthi16384e6:pieces3:abcee";
        assert!(parse(input.as_bytes()).is_err());
    }

    #[test]
    fn test_rejects_hash_count_mismatch() {
        let input = format!(
            "d4:infod6:lengthi16384e4:name4:file12:piece lengthi16384e{}ee",
            pieces_entry(2)
        );
        assert!(parse(input.as_bytes()).is_err());
    }

    #[test]
    fn test_rejects_oversized_piece_length() {
        let input = format!(
            "d4:infod6:lengthi1e4:name4:file12:piece lengthi4294967296e{}ee",
            pieces_entry(1)
        );
        assert!(parse(input.as_bytes()).is_err());
    }

    #[test]
    fn test_rejects_both_length_and_files() {
        let input = format!(
            "d4:infod5:filesle6:lengthi1e4:name4:file12:piece lengthi16384e{}ee",
            pieces_entry(1)
        );
        assert!(parse(input.as_bytes()).is_err());
    }

    #[test]
    fn test_tracker_urls_flat() {
        let input =
            b"d8:announce5:url/a13:announce-listll5:url/a5:url/bel5:url/cee4:infodee";
        let root = bencode::parse_dict(input).unwrap();
        let urls = tracker_urls(&root).unwrap();
        assert_eq!(urls, vec!["url/a", "url/b", "url/c"]);
    }

    #[test]
    fn test_tracker_urls_missing() {
        let root = bencode::parse_dict(b"d4:infodee").unwrap();
        assert!(tracker_urls(&root).is_err());
    }
}
