use crate::ndn::name::{DIGEST_LEN, Name, NameComponent};
use crate::ndn::tlv::{
    self, Reader, TLV_CONTENT, TLV_DATA, TLV_FORWARDING_HINT, TLV_INTEREST, TLV_INTEREST_LIFETIME,
    TLV_KEY_LOCATOR, TLV_NAME, TLV_SIGNATURE_INFO, TLV_SIGNATURE_TYPE, TLV_SIGNATURE_VALUE,
};
use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use std::time::Duration;

const SIG_TYPE_DIGEST_SHA256: u64 = 0;
const SIG_TYPE_ED25519: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    DigestSha256,
    Ed25519,
}

impl SignatureType {
    fn to_u64(self) -> u64 {
        match self {
            Self::DigestSha256 => SIG_TYPE_DIGEST_SHA256,
            Self::Ed25519 => SIG_TYPE_ED25519,
        }
    }

    fn from_u64(v: u64) -> Result<Self> {
        match v {
            SIG_TYPE_DIGEST_SHA256 => Ok(Self::DigestSha256),
            SIG_TYPE_ED25519 => Ok(Self::Ed25519),
            other => bail!("unsupported signature type {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub sig_type: SignatureType,
    pub key_locator: Option<Name>,
}

/// An NDN Data packet: name, content and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub name: Name,
    pub content: Vec<u8>,
    pub signature: SignatureInfo,
    pub signature_value: Vec<u8>,
}

impl Data {
    /// An unsigned packet skeleton; one of the keychain sign helpers must run
    /// before the packet is encoded or served.
    pub fn unsigned(name: Name, content: Vec<u8>) -> Self {
        Self {
            name,
            content,
            signature: SignatureInfo {
                sig_type: SignatureType::DigestSha256,
                key_locator: None,
            },
            signature_value: Vec::new(),
        }
    }

    /// The bytes covered by the signature: everything up to SignatureValue.
    pub fn signed_portion(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.name.encode_to(&mut out);
        tlv::write_tlv(&mut out, TLV_CONTENT, &self.content);
        let mut info = Vec::new();
        tlv::write_nonneg_integer(&mut info, TLV_SIGNATURE_TYPE, self.signature.sig_type.to_u64());
        if let Some(locator) = &self.signature.key_locator {
            tlv::write_tlv(&mut info, TLV_KEY_LOCATOR, &locator.encode());
        }
        tlv::write_tlv(&mut out, TLV_SIGNATURE_INFO, &info);
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut inner = self.signed_portion();
        tlv::write_tlv(&mut inner, TLV_SIGNATURE_VALUE, &self.signature_value);
        let mut out = Vec::new();
        tlv::write_tlv(&mut out, TLV_DATA, &inner);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut outer = Reader::new(bytes);
        let inner = outer.read_expected(TLV_DATA)?;
        if !outer.at_end() {
            bail!("trailing bytes after Data element");
        }
        let mut r = Reader::new(inner);
        let name = Name::decode_value(r.read_expected(TLV_NAME)?)?;
        let content = r.read_expected(TLV_CONTENT)?.to_vec();
        let info_bytes = r.read_expected(TLV_SIGNATURE_INFO)?;
        let signature_value = r.read_expected(TLV_SIGNATURE_VALUE)?.to_vec();
        if !r.at_end() {
            bail!("trailing bytes inside Data element");
        }

        let mut ir = Reader::new(info_bytes);
        let sig_type =
            SignatureType::from_u64(tlv::decode_nonneg_integer(ir.read_expected(TLV_SIGNATURE_TYPE)?)?)?;
        let key_locator = if ir.at_end() {
            None
        } else {
            Some(Name::decode(ir.read_expected(TLV_KEY_LOCATOR)?)?)
        };
        if !ir.at_end() {
            bail!("trailing bytes inside SignatureInfo");
        }

        Ok(Self {
            name,
            content,
            signature: SignatureInfo {
                sig_type,
                key_locator,
            },
            signature_value,
        })
    }

    /// SHA-256 of the wire encoding; the terminal component of the full name.
    pub fn implicit_digest(&self) -> [u8; DIGEST_LEN] {
        let digest = Sha256::digest(self.encode());
        digest.into()
    }

    pub fn full_name(&self) -> Name {
        self.name
            .child(NameComponent::implicit_digest(self.implicit_digest()))
    }
}

/// An NDN Interest. The forwarding hint carries alternative routable
/// prefixes and is passed opaquely to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    pub name: Name,
    pub forwarding_hint: Vec<Name>,
    pub lifetime: Option<Duration>,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            forwarding_hint: Vec::new(),
            lifetime: None,
        }
    }

    pub fn with_hint(mut self, hint: Vec<Name>) -> Self {
        self.forwarding_hint = hint;
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut inner = Vec::new();
        self.name.encode_to(&mut inner);
        if !self.forwarding_hint.is_empty() {
            let mut hint = Vec::new();
            for n in &self.forwarding_hint {
                n.encode_to(&mut hint);
            }
            tlv::write_tlv(&mut inner, TLV_FORWARDING_HINT, &hint);
        }
        if let Some(lifetime) = self.lifetime {
            tlv::write_nonneg_integer(&mut inner, TLV_INTEREST_LIFETIME, lifetime.as_millis() as u64);
        }
        let mut out = Vec::new();
        tlv::write_tlv(&mut out, TLV_INTEREST, &inner);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut outer = Reader::new(bytes);
        let inner = outer.read_expected(TLV_INTEREST)?;
        let mut r = Reader::new(inner);
        let name = Name::decode_value(r.read_expected(TLV_NAME)?)?;
        let mut forwarding_hint = Vec::new();
        let mut lifetime = None;
        while !r.at_end() {
            let (typ, value) = r.read_element()?;
            match typ {
                TLV_FORWARDING_HINT => {
                    let mut hr = Reader::new(value);
                    while !hr.at_end() {
                        forwarding_hint.push(Name::decode_value(hr.read_expected(TLV_NAME)?)?);
                    }
                }
                TLV_INTEREST_LIFETIME => {
                    lifetime = Some(Duration::from_millis(tlv::decode_nonneg_integer(value)?));
                }
                other => bail!("unsupported Interest field {other}"),
            }
        }
        Ok(Self {
            name,
            forwarding_hint,
            lifetime,
        })
    }

    /// Whether `data` satisfies this interest: the interest name must equal
    /// the data name, or the data name plus its implicit digest.
    pub fn matches(&self, data: &Data) -> bool {
        if self.name == data.name {
            return true;
        }
        match self.name.terminal_digest() {
            Some(digest) => {
                self.name.strip_digest() == data.name && digest == data.implicit_digest()
            }
            None => self.name.is_prefix_of(&data.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> Data {
        let mut data = Data::unsigned(Name::from_uri("/t/data/seg=0").unwrap(), vec![1, 2, 3]);
        data.signature_value = Sha256::digest(data.signed_portion()).to_vec();
        data
    }

    #[test]
    fn data_round_trips() {
        let data = sample_data();
        let decoded = Data::decode(&data.encode()).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(decoded.implicit_digest(), data.implicit_digest());
    }

    #[test]
    fn full_name_appends_digest() {
        let data = sample_data();
        let full = data.full_name();
        assert_eq!(full.strip_digest(), data.name);
        assert_eq!(full.terminal_digest(), Some(data.implicit_digest()));
    }

    #[test]
    fn interest_round_trips_with_hint_and_lifetime() {
        let interest = Interest::new(Name::from_uri("/t/torrent-file/seg=0").unwrap())
            .with_hint(vec![
                Name::from_uri("/hub/a").unwrap(),
                Name::from_uri("/hub/b").unwrap(),
            ])
            .with_lifetime(Duration::from_millis(4000));
        let decoded = Interest::decode(&interest.encode()).unwrap();
        assert_eq!(decoded, interest);
    }

    #[test]
    fn digest_qualified_interest_matches_only_exact_packet() {
        let data = sample_data();
        let exact = Interest::new(data.full_name());
        assert!(exact.matches(&data));

        let mut wrong_digest = data.full_name().strip_digest();
        wrong_digest.push(NameComponent::implicit_digest([0u8; 32]));
        assert!(!Interest::new(wrong_digest).matches(&data));
    }

    #[test]
    fn prefix_interest_matches() {
        let data = sample_data();
        assert!(Interest::new(Name::from_uri("/t/data").unwrap()).matches(&data));
        assert!(!Interest::new(Name::from_uri("/other").unwrap()).matches(&data));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = sample_data().encode();
        bytes.push(0);
        assert!(Data::decode(&bytes).is_err());
    }
}
