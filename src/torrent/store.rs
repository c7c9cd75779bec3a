use crate::ndn::name::Name;
use crate::torrent::errors::StoreError;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

pub type Result<T> = std::result::Result<T, StoreError>;

pub const TORRENT_DIR: &str = "torrent";
pub const MANIFESTS_DIR: &str = "manifests";

pub fn torrent_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(TORRENT_DIR)
}

pub fn manifests_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(MANIFESTS_DIR)
}

pub fn torrent_segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(index.to_string())
}

pub fn manifest_segment_path(dir: &Path, rel_path: &str, index: u64) -> PathBuf {
    dir.join(rel_path).join(index.to_string())
}

pub fn file_path(data_dir: &Path, rel_path: &str) -> PathBuf {
    data_dir.join(rel_path)
}

pub async fn ensure_layout(data_dir: &Path) -> Result<()> {
    for dir in [
        data_dir.to_path_buf(),
        torrent_dir(data_dir),
        manifests_dir(data_dir),
    ] {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::EnsureDir { path: dir, source })?;
    }
    Ok(())
}

/// Write one wire-format blob, creating parent directories as needed.
pub async fn write_wire(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StoreError::EnsureDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| StoreError::WriteFile {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_segment_file_name(path: &Path) -> Option<u64> {
    path.file_name()?.to_str()?.parse().ok()
}

/// Wire blobs under `torrent/`, sorted by segment index. Unreadable entries
/// are skipped with a warning; a missing directory reads as empty.
pub async fn scan_torrent_segments(dir: &Path) -> Result<Vec<(u64, Vec<u8>)>> {
    let mut out = Vec::new();
    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(source) => {
            return Err(StoreError::ReadDir {
                path: dir.to_path_buf(),
                source,
            });
        }
    };
    while let Some(entry) = rd
        .next_entry()
        .await
        .map_err(|source| StoreError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
    {
        let path = entry.path();
        let Some(index) = parse_segment_file_name(&path) else {
            tracing::warn!(path = %path.display(), "skipping non-segment file in torrent dir");
            continue;
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => out.push((index, bytes)),
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "skipping unreadable torrent segment");
            }
        }
    }
    out.sort_by_key(|(index, _)| *index);
    Ok(out)
}

#[derive(Debug)]
pub struct ScannedManifestSegment {
    pub rel_path: String,
    pub index: u64,
    pub bytes: Vec<u8>,
}

/// Wire blobs under `manifests/<rel-path>/<index>`, sorted by path then
/// index. Unreadable entries are skipped with a warning.
pub async fn scan_manifest_segments(dir: &Path) -> Result<Vec<ScannedManifestSegment>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut rd = match tokio::fs::read_dir(&current).await {
            Ok(rd) => rd,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => continue,
            Err(source) => {
                return Err(StoreError::ReadDir {
                    path: current,
                    source,
                });
            }
        };
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|source| StoreError::ReadDir {
                path: current.clone(),
                source,
            })?
        {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let Some(index) = parse_segment_file_name(&path) else {
                tracing::warn!(path = %path.display(), "skipping non-segment file in manifests dir");
                continue;
            };
            let Some(rel_path) = path
                .parent()
                .and_then(|p| p.strip_prefix(dir).ok())
                .and_then(|p| p.to_str())
                .map(str::to_string)
            else {
                tracing::warn!(path = %path.display(), "skipping manifest segment outside layout");
                continue;
            };
            if rel_path.is_empty() {
                tracing::warn!(path = %path.display(), "skipping manifest segment without file path");
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => out.push(ScannedManifestSegment {
                    rel_path,
                    index,
                    bytes,
                }),
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "skipping unreadable manifest segment");
                }
            }
        }
    }
    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path).then(a.index.cmp(&b.index)));
    Ok(out)
}

/// One reconstructed file: an open read/write handle over a pre-sized file
/// and the presence bitmap across its data packets. The bitmap length is
/// fixed at allocation.
#[derive(Debug)]
pub struct FileState {
    path: PathBuf,
    file: tokio::fs::File,
    bitmap: Vec<bool>,
    data_packet_size: u64,
    file_length: u64,
    packets: Vec<Name>,
}

impl FileState {
    /// Open or create the file, pre-size it to `file_length`, and start with
    /// an all-zero bitmap over `packets`.
    pub async fn allocate(
        path: PathBuf,
        file_length: u64,
        data_packet_size: u64,
        packets: Vec<Name>,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::EnsureDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|source| StoreError::WriteFile {
                path: path.clone(),
                source,
            })?;
        file.set_len(file_length)
            .await
            .map_err(|source| StoreError::WriteFile {
                path: path.clone(),
                source,
            })?;
        let bitmap = vec![false; packets.len()];
        Ok(Self {
            path,
            file,
            bitmap,
            data_packet_size,
            file_length,
            packets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn packets(&self) -> &[Name] {
        &self.packets
    }

    pub fn bitmap(&self) -> &[bool] {
        &self.bitmap
    }

    pub fn data_packet_size(&self) -> u64 {
        self.data_packet_size
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn has(&self, index: usize) -> bool {
        self.bitmap.get(index).copied().unwrap_or(false)
    }

    pub fn mark_present(&mut self, index: usize) {
        if let Some(bit) = self.bitmap.get_mut(index) {
            *bit = true;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bitmap.iter().all(|b| *b)
    }

    pub fn missing_indices(&self) -> Vec<usize> {
        self.bitmap
            .iter()
            .enumerate()
            .filter(|(_, present)| !**present)
            .map(|(i, _)| i)
            .collect()
    }

    /// Payload length of packet `index`; the final packet may be short.
    pub fn payload_len(&self, index: usize) -> u64 {
        let offset = index as u64 * self.data_packet_size;
        self.data_packet_size.min(self.file_length.saturating_sub(offset))
    }

    /// Write packet `index`'s payload at its file offset and set its bit.
    pub async fn write_packet(&mut self, index: usize, payload: &[u8]) -> Result<()> {
        let offset = index as u64 * self.data_packet_size;
        self.file
            .seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|source| StoreError::WriteFile {
                path: self.path.clone(),
                source,
            })?;
        self.file
            .write_all(payload)
            .await
            .map_err(|source| StoreError::WriteFile {
                path: self.path.clone(),
                source,
            })?;
        self.file
            .flush()
            .await
            .map_err(|source| StoreError::WriteFile {
                path: self.path.clone(),
                source,
            })?;
        self.mark_present(index);
        Ok(())
    }

    /// Read back packet `index`'s payload range.
    pub async fn read_packet(&mut self, index: usize) -> Result<Vec<u8>> {
        let offset = index as u64 * self.data_packet_size;
        let len = self.payload_len(index) as usize;
        self.file
            .seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|source| StoreError::ReadFile {
                path: self.path.clone(),
                source,
            })?;
        let mut payload = vec![0u8; len];
        self.file
            .read_exact(&mut payload)
            .await
            .map_err(|source| StoreError::ReadFile {
                path: self.path.clone(),
                source,
            })?;
        Ok(payload)
    }

    pub async fn close(mut self) {
        if let Err(error) = self.file.flush().await {
            tracing::warn!(path = %self.path.display(), error = %error, "flush on close failed");
        }
    }
}
