pub mod errors;
pub mod file;
pub mod manager;
pub mod manifest;
pub mod queue;
pub mod stats;
pub mod store;

pub use errors::{FetchError, StoreError};
pub use file::TorrentFileSegment;
pub use manager::TorrentManager;
pub use manifest::FileManifestSegment;
pub use queue::{InterestQueue, Priority, QueuedInterest};
pub use stats::StatsTable;

/// Name marker component preceding a torrent-file segment number.
pub const TORRENT_FILE_MARKER: &[u8] = b"torrent-file";
/// Name marker component preceding a manifest segment number.
pub const MANIFEST_MARKER: &[u8] = b"manifest";
/// Name marker component preceding a data-packet segment number.
pub const DATA_MARKER: &[u8] = b"data";

// Application TLV types carried in catalog Content.
pub(crate) const TLV_CATALOG_ENTRY: u64 = 128;
pub(crate) const TLV_NEXT_SEGMENT: u64 = 129;
pub(crate) const TLV_FILE_PATH: u64 = 130;
pub(crate) const TLV_DATA_PACKET_SIZE: u64 = 131;
pub(crate) const TLV_SUB_MANIFEST_SIZE: u64 = 132;
pub(crate) const TLV_FILE_LENGTH: u64 = 133;
