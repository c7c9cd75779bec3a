#![no_main]

use libfuzzer_sys::fuzz_target;
use ntorrent::ndn::packet::Data;
use ntorrent::torrent::{FileManifestSegment, TorrentFileSegment};

fuzz_target!(|data: &[u8]| {
    let _ = Data::decode(data).map(|packet| {
        let _ = TorrentFileSegment::from_data(&packet);
        let _ = FileManifestSegment::from_data(&packet);
    });
});
