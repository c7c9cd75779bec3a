use crate::ndn::name::Name;
use crate::ndn::packet::Data;
use crate::ndn::tlv::{self, Reader};
use crate::ndn::KeyChain;
use crate::torrent::{
    MANIFEST_MARKER, TLV_CATALOG_ENTRY, TLV_DATA_PACKET_SIZE, TLV_FILE_LENGTH, TLV_FILE_PATH,
    TLV_NEXT_SEGMENT, TLV_SUB_MANIFEST_SIZE,
};
use anyhow::{Result, bail};
use std::path::Component;

/// One segment of a file manifest: the catalog of data-packet names for one
/// user file, in strict file-offset order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileManifestSegment {
    name: Name,
    file_path: String,
    file_length: u64,
    data_packet_size: u64,
    sub_manifest_size: u64,
    packets: Vec<Name>,
    next: Option<Name>,
}

impl FileManifestSegment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: Name,
        file_path: String,
        file_length: u64,
        data_packet_size: u64,
        sub_manifest_size: u64,
        packets: Vec<Name>,
        next: Option<Name>,
    ) -> Self {
        Self {
            name,
            file_path,
            file_length,
            data_packet_size,
            sub_manifest_size,
            packets,
            next,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn data_packet_size(&self) -> u64 {
        self.data_packet_size
    }

    pub fn sub_manifest_size(&self) -> u64 {
        self.sub_manifest_size
    }

    pub fn packets(&self) -> &[Name] {
        &self.packets
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

    /// Packets a complete chain must total for this file.
    pub fn expected_packet_count(&self) -> u64 {
        self.file_length.div_ceil(self.data_packet_size)
    }

    pub fn encode_content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        tlv::write_tlv(&mut out, TLV_FILE_PATH, self.file_path.as_bytes());
        tlv::write_nonneg_integer(&mut out, TLV_FILE_LENGTH, self.file_length);
        tlv::write_nonneg_integer(&mut out, TLV_DATA_PACKET_SIZE, self.data_packet_size);
        tlv::write_nonneg_integer(&mut out, TLV_SUB_MANIFEST_SIZE, self.sub_manifest_size);
        for packet in &self.packets {
            tlv::write_tlv(&mut out, TLV_CATALOG_ENTRY, &packet.encode());
        }
        if let Some(next) = &self.next {
            tlv::write_tlv(&mut out, TLV_NEXT_SEGMENT, &next.encode());
        }
        out
    }

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
            bail!("manifest segment name lacks a segment component: {name}");
        }
        let marker_pos = name.len().checked_sub(2);
        if marker_pos.is_none_or(|i| name.get(i).map(|c| c.value()) != Some(MANIFEST_MARKER)) {
            bail!("manifest segment name lacks the manifest marker: {name}");
        }

        let mut r = Reader::new(&data.content);
        let file_path = String::from_utf8(r.read_expected(TLV_FILE_PATH)?.to_vec())?;
        sanitize_rel_path(&file_path)?;
        let file_length = tlv::decode_nonneg_integer(r.read_expected(TLV_FILE_LENGTH)?)?;
        let data_packet_size =
            tlv::decode_nonneg_integer(r.read_expected(TLV_DATA_PACKET_SIZE)?)?;
        let sub_manifest_size =
            tlv::decode_nonneg_integer(r.read_expected(TLV_SUB_MANIFEST_SIZE)?)?;
        if data_packet_size == 0 {
            bail!("data packet size must be positive");
        }
        if sub_manifest_size == 0 {
            bail!("sub-manifest size must be positive");
        }

        let mut packets = Vec::new();
        let mut next = None;
        while !r.at_end() {
            let (typ, value) = r.read_element()?;
            match typ {
                TLV_CATALOG_ENTRY => {
                    if next.is_some() {
                        bail!("packet entry after next-segment link");
                    }
                    packets.push(Name::decode(value)?);
                }
                TLV_NEXT_SEGMENT => {
                    if next.is_some() {
                        bail!("duplicate next-segment link");
                    }
                    next = Some(Name::decode(value)?);
                }
                other => bail!("unknown manifest segment field {other}"),
            }
        }
        if packets.len() as u64 > sub_manifest_size {
            bail!(
                "segment lists {} packets, sub-manifest size is {sub_manifest_size}",
                packets.len()
            );
        }
        if next.is_some() && packets.len() as u64 != sub_manifest_size {
            bail!("non-terminal segment must list exactly sub-manifest-size packets");
        }
        for packet in &packets {
            if packet.terminal_digest().is_none() {
                bail!("packet entry lacks an implicit digest: {packet}");
            }
            if packet.segment_index().is_none() {
                bail!("packet entry lacks a segment component: {packet}");
            }
        }
        if let Some(next) = &next {
            if next.terminal_digest().is_none() {
                bail!("next-segment link lacks an implicit digest: {next}");
            }
        }

        Ok(Self {
            name,
            file_path,
            file_length,
            data_packet_size,
            sub_manifest_size,
            packets,
            next,
        })
    }
}

/// Reject path traversal in a manifest-declared file path.
pub fn sanitize_rel_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("empty file path");
    }
    let p = std::path::Path::new(path);
    if p.is_absolute() {
        bail!("absolute file path: '{path}'");
    }
    for component in p.components() {
        match component {
            Component::Normal(_) => {}
            _ => bail!("unsafe file path: '{path}'"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndn::name::NameComponent;

    fn packet_entry(i: u64) -> Name {
        Name::from_uri(&format!("/t/a.bin/data/seg={i}"))
            .unwrap()
            .child(NameComponent::implicit_digest([i as u8; 32]))
    }

    fn sample(next: Option<Name>, packets: Vec<Name>, index: u64) -> FileManifestSegment {
        FileManifestSegment::new(
            Name::from_uri(&format!("/t/a.bin/manifest/seg={index}")).unwrap(),
            "a.bin".to_string(),
            2500,
            1024,
            2,
            packets,
            next,
        )
    }

    #[test]
    fn round_trips_through_data() {
        let next = Name::from_uri("/t/a.bin/manifest/seg=1")
            .unwrap()
            .child(NameComponent::implicit_digest([8; 32]));
        let seg = sample(Some(next), vec![packet_entry(0), packet_entry(1)], 0);
        let chain = KeyChain::with_generated_key(Name::from_uri("/keys/pub").unwrap()).unwrap();
        let data = seg.to_data(&chain).unwrap();
        assert!(chain.verify(&data));

        let decoded = FileManifestSegment::from_data(&data).unwrap();
        assert_eq!(decoded, seg);
        assert_eq!(decoded.expected_packet_count(), 3);
        assert_eq!(decoded.chain(), Name::from_uri("/t/a.bin/manifest").unwrap());
    }

    #[test]
    fn non_terminal_segment_must_be_full() {
        let next = Name::from_uri("/t/a.bin/manifest/seg=1")
            .unwrap()
            .child(NameComponent::implicit_digest([8; 32]));
        let seg = sample(Some(next), vec![packet_entry(0)], 0);
        let data = seg.to_data(&KeyChain::new()).unwrap();
        assert!(FileManifestSegment::from_data(&data).is_err());
    }

    #[test]
    fn terminal_segment_may_be_short() {
        let seg = sample(None, vec![packet_entry(2)], 1);
        let data = seg.to_data(&KeyChain::new()).unwrap();
        let decoded = FileManifestSegment::from_data(&data).unwrap();
        assert_eq!(decoded.packets().len(), 1);
        assert_eq!(decoded.segment_index(), 1);
    }

    #[test]
    fn rejects_traversal_paths() {
        assert!(sanitize_rel_path("ok/nested.bin").is_ok());
        assert!(sanitize_rel_path("../escape").is_err());
        assert!(sanitize_rel_path("/etc/passwd").is_err());
        assert!(sanitize_rel_path("a/../b").is_err());
        assert!(sanitize_rel_path("").is_err());
    }

    #[test]
    fn rejects_zero_packet_size() {
        let mut seg = sample(None, vec![packet_entry(0)], 0);
        seg.data_packet_size = 0;
        let data = seg.to_data(&KeyChain::new()).unwrap();
        assert!(FileManifestSegment::from_data(&data).is_err());
    }
}
