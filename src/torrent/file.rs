use crate::ndn::name::Name;
use crate::ndn::packet::Data;
use crate::ndn::tlv::{self, Reader};
use crate::ndn::KeyChain;
use crate::torrent::{TLV_CATALOG_ENTRY, TLV_NEXT_SEGMENT, TORRENT_FILE_MARKER};
use anyhow::{Result, bail};

/// One segment of the torrent file: an ordered catalog of file-manifest
/// initial-segment names, chained to its successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFileSegment {
    name: Name,
    catalog: Vec<Name>,
    next: Option<Name>,
}

impl TorrentFileSegment {
    pub fn new(name: Name, catalog: Vec<Name>, next: Option<Name>) -> Self {
        Self {
            name,
            catalog,
            next,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn catalog(&self) -> &[Name] {
        &self.catalog
    }

    pub fn next(&self) -> Option<&Name> {
        self.next.as_ref()
    }

    pub fn segment_index(&self) -> u64 {
        self.name.segment_index().unwrap_or(0)
    }

    /// The chain key: the segment name minus digest and segment components.
    pub fn chain(&self) -> Name {
        self.name.chain_prefix()
    }

    pub fn encode_content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.catalog {
            tlv::write_tlv(&mut out, TLV_CATALOG_ENTRY, &entry.encode());
        }
        if let Some(next) = &self.next {
            tlv::write_tlv(&mut out, TLV_NEXT_SEGMENT, &next.encode());
        }
        out
    }

    /// Re-encode as a signed Data packet: Ed25519 when the keychain has a
    /// signing identity, DigestSha256 otherwise.
    pub fn to_data(&self, key_chain: &KeyChain) -> Result<Data> {
        let mut data = Data::unsigned(self.name.clone(), self.encode_content());
        if key_chain.signing_identity().is_some() {
            key_chain.sign(&mut data)?;
        } else {
            KeyChain::sign_digest(&mut data);
        }
        Ok(data)
    }

    pub fn from_data(data: &Data) -> Result<Self> {
        let name = data.name.clone();
        if name.segment_index().is_none() {
            bail!("torrent segment name lacks a segment component: {name}");
        }
        let marker_pos = name.len().checked_sub(2);
        if marker_pos.is_none_or(|i| name.get(i).map(|c| c.value()) != Some(TORRENT_FILE_MARKER)) {
            bail!("torrent segment name lacks the torrent-file marker: {name}");
        }

        let mut catalog = Vec::new();
        let mut next = None;
        let mut r = Reader::new(&data.content);
        while !r.at_end() {
            let (typ, value) = r.read_element()?;
            match typ {
                TLV_CATALOG_ENTRY => {
                    if next.is_some() {
                        bail!("catalog entry after next-segment link");
                    }
                    catalog.push(Name::decode(value)?);
                }
                TLV_NEXT_SEGMENT => {
                    if next.is_some() {
                        bail!("duplicate next-segment link");
                    }
                    next = Some(Name::decode(value)?);
                }
                other => bail!("unknown torrent segment field {other}"),
            }
        }
        for entry in &catalog {
            if entry.terminal_digest().is_none() {
                bail!("catalog entry lacks an implicit digest: {entry}");
            }
        }
        if let Some(next) = &next {
            if next.terminal_digest().is_none() {
                bail!("next-segment link lacks an implicit digest: {next}");
            }
        }
        Ok(Self {
            name,
            catalog,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndn::name::NameComponent;

    fn entry(i: u8) -> Name {
        Name::from_uri(&format!("/t/file{i}/manifest/seg=0"))
            .unwrap()
            .child(NameComponent::implicit_digest([i; 32]))
    }

    #[test]
    fn round_trips_through_data() {
        let next = Name::from_uri("/t/torrent-file/seg=1")
            .unwrap()
            .child(NameComponent::implicit_digest([9; 32]));
        let seg = TorrentFileSegment::new(
            Name::from_uri("/t/torrent-file/seg=0").unwrap(),
            vec![entry(1), entry(2)],
            Some(next),
        );
        let chain = KeyChain::with_generated_key(Name::from_uri("/keys/pub").unwrap()).unwrap();
        let data = seg.to_data(&chain).unwrap();
        assert!(chain.verify(&data));

        let decoded = TorrentFileSegment::from_data(&data).unwrap();
        assert_eq!(decoded, seg);
        assert_eq!(decoded.segment_index(), 0);
        assert_eq!(decoded.chain(), Name::from_uri("/t/torrent-file").unwrap());
    }

    #[test]
    fn terminal_segment_has_no_next() {
        let seg = TorrentFileSegment::new(
            Name::from_uri("/t/torrent-file/seg=3").unwrap(),
            vec![entry(1)],
            None,
        );
        let data = seg.to_data(&KeyChain::new()).unwrap();
        let decoded = TorrentFileSegment::from_data(&data).unwrap();
        assert!(decoded.next().is_none());
        assert_eq!(decoded.segment_index(), 3);
    }

    #[test]
    fn rejects_wrong_marker() {
        let seg = TorrentFileSegment::new(
            Name::from_uri("/t/not-a-torrent/seg=0").unwrap(),
            vec![entry(1)],
            None,
        );
        let data = seg.to_data(&KeyChain::new()).unwrap();
        assert!(TorrentFileSegment::from_data(&data).is_err());
    }

    #[test]
    fn rejects_digestless_entries() {
        let seg = TorrentFileSegment::new(
            Name::from_uri("/t/torrent-file/seg=0").unwrap(),
            vec![Name::from_uri("/t/file1/manifest/seg=0").unwrap()],
            None,
        );
        let data = seg.to_data(&KeyChain::new()).unwrap();
        assert!(TorrentFileSegment::from_data(&data).is_err());
    }
}
