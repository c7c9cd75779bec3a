use crate::ndn::tlv::{
    self, Reader, TLV_GENERIC_COMPONENT, TLV_IMPLICIT_DIGEST_COMPONENT, TLV_NAME,
    TLV_SEGMENT_COMPONENT,
};
use anyhow::{Result, bail};
use std::fmt;

pub const DIGEST_LEN: usize = 32;

/// One typed component of a hierarchical NDN name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameComponent {
    typ: u64,
    value: Vec<u8>,
}

impl NameComponent {
    pub fn generic(value: impl Into<Vec<u8>>) -> Self {
        Self {
            typ: TLV_GENERIC_COMPONENT,
            value: value.into(),
        }
    }

    pub fn segment(index: u64) -> Self {
        let mut value = Vec::new();
        if index <= u64::from(u8::MAX) {
            value.push(index as u8);
        } else if index <= u64::from(u16::MAX) {
            value.extend_from_slice(&(index as u16).to_be_bytes());
        } else if index <= u64::from(u32::MAX) {
            value.extend_from_slice(&(index as u32).to_be_bytes());
        } else {
            value.extend_from_slice(&index.to_be_bytes());
        }
        Self {
            typ: TLV_SEGMENT_COMPONENT,
            value,
        }
    }

    pub fn implicit_digest(digest: [u8; DIGEST_LEN]) -> Self {
        Self {
            typ: TLV_IMPLICIT_DIGEST_COMPONENT,
            value: digest.to_vec(),
        }
    }

    pub fn is_segment(&self) -> bool {
        self.typ == TLV_SEGMENT_COMPONENT
    }

    pub fn is_implicit_digest(&self) -> bool {
        self.typ == TLV_IMPLICIT_DIGEST_COMPONENT && self.value.len() == DIGEST_LEN
    }

    pub fn as_segment(&self) -> Option<u64> {
        if !self.is_segment() {
            return None;
        }
        tlv::decode_nonneg_integer(&self.value).ok()
    }

    pub fn as_digest(&self) -> Option<[u8; DIGEST_LEN]> {
        if !self.is_implicit_digest() {
            return None;
        }
        self.value.as_slice().try_into().ok()
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    fn decode(typ: u64, value: &[u8]) -> Result<Self> {
        match typ {
            TLV_GENERIC_COMPONENT | TLV_SEGMENT_COMPONENT => Ok(Self {
                typ,
                value: value.to_vec(),
            }),
            TLV_IMPLICIT_DIGEST_COMPONENT => {
                if value.len() != DIGEST_LEN {
                    bail!("implicit digest component must be {DIGEST_LEN} bytes");
                }
                Ok(Self {
                    typ,
                    value: value.to_vec(),
                })
            }
            other => bail!("unsupported name component type {other}"),
        }
    }
}

impl fmt::Display for NameComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(seg) = self.as_segment() {
            return write!(f, "seg={seg}");
        }
        if let Some(digest) = self.as_digest() {
            return write!(f, "sha256digest={}", hex::encode(digest));
        }
        match std::str::from_utf8(&self.value) {
            Ok(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_graphic() && c != '/') => {
                write!(f, "{s}")
            }
            _ => write!(f, "0x{}", hex::encode(&self.value)),
        }
    }
}

/// A hierarchical NDN name. Equality and hashing are component-wise, so two
/// names differing only in a terminal implicit digest are distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    components: Vec<NameComponent>,
}

impl Name {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a URI-style name: `/a/b/seg=3/sha256digest=<hex>`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let trimmed = uri.trim();
        let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
        let mut name = Name::new();
        for part in trimmed.split('/') {
            if part.is_empty() {
                continue;
            }
            if let Some(seg) = part.strip_prefix("seg=") {
                name.components.push(NameComponent::segment(seg.parse()?));
            } else if let Some(hexdigest) = part.strip_prefix("sha256digest=") {
                let raw = hex::decode(hexdigest)?;
                let digest: [u8; DIGEST_LEN] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("digest component must be {DIGEST_LEN} bytes"))?;
                name.components.push(NameComponent::implicit_digest(digest));
            } else {
                name.components.push(NameComponent::generic(part.as_bytes()));
            }
        }
        if name.is_empty() {
            bail!("empty name: '{uri}'");
        }
        Ok(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[NameComponent] {
        &self.components
    }

    pub fn get(&self, i: usize) -> Option<&NameComponent> {
        self.components.get(i)
    }

    pub fn push(&mut self, component: NameComponent) {
        self.components.push(component);
    }

    pub fn child(&self, component: NameComponent) -> Name {
        let mut out = self.clone();
        out.push(component);
        out
    }

    pub fn join(&self, suffix: &Name) -> Name {
        let mut out = self.clone();
        out.components.extend(suffix.components.iter().cloned());
        out
    }

    /// The first `n` components.
    pub fn prefix(&self, n: usize) -> Name {
        Name {
            components: self.components[..n.min(self.components.len())].to_vec(),
        }
    }

    pub fn slice(&self, from: usize) -> Name {
        Name {
            components: self.components[from.min(self.components.len())..].to_vec(),
        }
    }

    pub fn is_prefix_of(&self, other: &Name) -> bool {
        other.components.len() >= self.components.len()
            && other.components[..self.components.len()] == self.components[..]
    }

    /// Index at which `infix`'s components begin inside this name, if anywhere.
    pub fn find(&self, infix: &Name) -> Option<usize> {
        if infix.is_empty() || infix.len() > self.len() {
            return None;
        }
        (0..=self.len() - infix.len())
            .find(|&i| self.components[i..i + infix.len()] == infix.components[..])
    }

    /// The terminal implicit digest, if this name carries one.
    pub fn terminal_digest(&self) -> Option<[u8; DIGEST_LEN]> {
        self.components.last().and_then(NameComponent::as_digest)
    }

    /// This name without a terminal implicit digest component.
    pub fn strip_digest(&self) -> Name {
        if self.terminal_digest().is_some() {
            Name {
                components: self.components[..self.components.len() - 1].to_vec(),
            }
        } else {
            self.clone()
        }
    }

    /// The terminal segment index, ignoring a trailing implicit digest.
    pub fn segment_index(&self) -> Option<u64> {
        self.strip_digest()
            .components
            .last()
            .and_then(NameComponent::as_segment)
    }

    /// The name minus any terminal digest and segment components: the chain key.
    pub fn chain_prefix(&self) -> Name {
        let stripped = self.strip_digest();
        if stripped
            .components
            .last()
            .is_some_and(NameComponent::is_segment)
        {
            Name {
                components: stripped.components[..stripped.components.len() - 1].to_vec(),
            }
        } else {
            stripped
        }
    }

    pub fn with_segment(&self, index: u64) -> Name {
        self.child(NameComponent::segment(index))
    }

    pub fn encode_to(&self, out: &mut Vec<u8>) {
        let mut inner = Vec::new();
        for c in &self.components {
            tlv::write_tlv(&mut inner, c.typ, &c.value);
        }
        tlv::write_tlv(out, TLV_NAME, &inner);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_to(&mut out);
        out
    }

    pub fn decode_value(value: &[u8]) -> Result<Self> {
        let mut r = Reader::new(value);
        let mut components = Vec::new();
        while !r.at_end() {
            let (typ, v) = r.read_element()?;
            components.push(NameComponent::decode(typ, v)?);
        }
        Ok(Name { components })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let value = r.read_expected(TLV_NAME)?;
        Self::decode_value(value)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for c in &self.components {
            write!(f, "/{c}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_round_trips() {
        let name = Name::from_uri("/alpha/beta/seg=17").unwrap();
        assert_eq!(name.len(), 3);
        assert_eq!(name.segment_index(), Some(17));
        assert_eq!(name.to_string(), "/alpha/beta/seg=17");
        let reparsed = Name::from_uri(&name.to_string()).unwrap();
        assert_eq!(reparsed, name);
    }

    #[test]
    fn wire_round_trips() {
        let name = Name::from_uri("/alpha/beta/seg=300").unwrap();
        let decoded = Name::decode(&name.encode()).unwrap();
        assert_eq!(decoded, name);
    }

    #[test]
    fn digest_names_are_distinct() {
        let base = Name::from_uri("/a/data/seg=0").unwrap();
        let with_digest = base.child(NameComponent::implicit_digest([7u8; 32]));
        assert_ne!(base, with_digest);
        assert_eq!(with_digest.strip_digest(), base);
        assert_eq!(with_digest.terminal_digest(), Some([7u8; 32]));
        assert_eq!(with_digest.segment_index(), Some(0));
    }

    #[test]
    fn chain_prefix_drops_segment_and_digest() {
        let name = Name::from_uri("/a/b/manifest/seg=4").unwrap();
        let with_digest = name.child(NameComponent::implicit_digest([1u8; 32]));
        let chain = Name::from_uri("/a/b/manifest").unwrap();
        assert_eq!(name.chain_prefix(), chain);
        assert_eq!(with_digest.chain_prefix(), chain);
        assert_eq!(chain.with_segment(4), name);
    }

    #[test]
    fn find_locates_infix() {
        let root = Name::from_uri("/root/t").unwrap();
        let full = Name::from_uri("/hub/region/root/t/data/seg=1").unwrap();
        assert_eq!(full.find(&root), Some(2));
        assert_eq!(full.slice(2).to_string(), "/root/t/data/seg=1");
        assert_eq!(full.find(&Name::from_uri("/absent").unwrap()), None);
    }

    #[test]
    fn prefix_test() {
        let p = Name::from_uri("/a/b").unwrap();
        assert!(p.is_prefix_of(&Name::from_uri("/a/b/c").unwrap()));
        assert!(!p.is_prefix_of(&Name::from_uri("/a/c/b").unwrap()));
        assert!(!Name::from_uri("/a/b/c").unwrap().is_prefix_of(&p));
    }
}
