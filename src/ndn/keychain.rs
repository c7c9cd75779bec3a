use crate::ndn::name::Name;
use crate::ndn::packet::{Data, SignatureInfo, SignatureType};
use anyhow::{Context, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

const ED25519_SIGNATURE_LEN: usize = 64;

/// One trust-anchor entry as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustAnchorEntry {
    pub name: String,
    pub public_key_hex: String,
}

#[derive(Debug, Clone)]
struct TrustAnchor {
    name: Name,
    key: VerifyingKey,
}

/// Signature verification and signing.
///
/// Catalogs (torrent and manifest segments) are Ed25519-signed; data packets
/// carry DigestSha256 signatures so that they are reconstructible bit-exactly
/// from name plus payload. With no anchors configured the chain runs
/// anchorless: Ed25519 signatures are only checked for well-formedness.
pub struct KeyChain {
    anchors: Vec<TrustAnchor>,
    signing: Option<(Name, SigningKey)>,
}

impl KeyChain {
    pub fn new() -> Self {
        Self {
            anchors: Vec::new(),
            signing: None,
        }
    }

    /// A keychain with a freshly generated Ed25519 signing key named
    /// `identity`. The key is also trusted, so locally signed catalogs verify.
    pub fn with_generated_key(identity: Name) -> Result<Self> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).context("gathering key seed entropy")?;
        let signing = SigningKey::from_bytes(&seed);
        let mut chain = Self::new();
        chain.anchors.push(TrustAnchor {
            name: identity.clone(),
            key: signing.verifying_key(),
        });
        chain.signing = Some((identity, signing));
        Ok(chain)
    }

    pub fn add_anchor(&mut self, name: Name, key: VerifyingKey) {
        self.anchors.push(TrustAnchor { name, key });
    }

    pub fn has_anchors(&self) -> bool {
        !self.anchors.is_empty()
    }

    pub fn signing_identity(&self) -> Option<&Name> {
        self.signing.as_ref().map(|(name, _)| name)
    }

    /// Load trust anchors from a JSON file of `TrustAnchorEntry` records.
    pub fn load_anchors(&mut self, path: &Path) -> Result<usize> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading trust anchors '{}'", path.display()))?;
        let entries: Vec<TrustAnchorEntry> = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing trust anchors '{}'", path.display()))?;
        let mut added = 0;
        for entry in entries {
            let name = Name::from_uri(&entry.name)
                .with_context(|| format!("anchor name '{}'", entry.name))?;
            let raw = hex::decode(&entry.public_key_hex)
                .with_context(|| format!("anchor key for '{}'", entry.name))?;
            let key_bytes: [u8; 32] = raw
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("anchor key for '{}' must be 32 bytes", entry.name))?;
            let key = VerifyingKey::from_bytes(&key_bytes)
                .with_context(|| format!("anchor key for '{}'", entry.name))?;
            self.add_anchor(name, key);
            added += 1;
        }
        Ok(added)
    }

    /// Verify `data` against its signature.
    pub fn verify(&self, data: &Data) -> bool {
        match data.signature.sig_type {
            SignatureType::DigestSha256 => {
                let expected = Sha256::digest(data.signed_portion());
                data.signature_value.as_slice() == expected.as_slice()
            }
            SignatureType::Ed25519 => self.verify_ed25519(data),
        }
    }

    fn verify_ed25519(&self, data: &Data) -> bool {
        let Some(locator) = &data.signature.key_locator else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; ED25519_SIGNATURE_LEN]>::try_from(data.signature_value.as_slice())
        else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);

        if self.anchors.is_empty() {
            // Anchorless mode: nothing to chain to; the catalog digests still
            // pin every packet, so accept a structurally complete signature.
            tracing::trace!(locator = %locator, "anchorless ed25519 acceptance");
            return true;
        }
        self.anchors
            .iter()
            .filter(|a| a.name.is_prefix_of(locator) || a.name == *locator)
            .any(|a| a.key.verify(&data.signed_portion(), &signature).is_ok())
    }

    /// Attach a DigestSha256 signature; deterministic, key-free.
    pub fn sign_digest(data: &mut Data) {
        data.signature = SignatureInfo {
            sig_type: SignatureType::DigestSha256,
            key_locator: None,
        };
        data.signature_value = Sha256::digest(data.signed_portion()).to_vec();
    }

    /// Attach an Ed25519 signature under the configured signing identity.
    pub fn sign(&self, data: &mut Data) -> Result<()> {
        let (identity, key) = self
            .signing
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no signing key configured"))?;
        data.signature = SignatureInfo {
            sig_type: SignatureType::Ed25519,
            key_locator: Some(identity.clone()),
        };
        data.signature_value = key.sign(&data.signed_portion()).to_bytes().to_vec();
        Ok(())
    }
}

impl Default for KeyChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_sample(chain: &KeyChain) -> Data {
        let mut data = Data::unsigned(
            Name::from_uri("/t/torrent-file/seg=0").unwrap(),
            b"catalog".to_vec(),
        );
        chain.sign(&mut data).unwrap();
        data
    }

    #[test]
    fn digest_signature_verifies_and_detects_tamper() {
        let chain = KeyChain::new();
        let mut data = Data::unsigned(Name::from_uri("/t/data/seg=0").unwrap(), vec![9, 9]);
        KeyChain::sign_digest(&mut data);
        assert!(chain.verify(&data));

        data.content[0] = 0;
        assert!(!chain.verify(&data));
    }

    #[test]
    fn ed25519_chains_to_anchor() {
        let chain = KeyChain::with_generated_key(Name::from_uri("/keys/alice").unwrap()).unwrap();
        let data = signed_sample(&chain);
        assert!(chain.verify(&data));

        let mut tampered = data.clone();
        tampered.content.push(1);
        assert!(!chain.verify(&tampered));
    }

    #[test]
    fn ed25519_rejected_under_foreign_anchor() {
        let signer = KeyChain::with_generated_key(Name::from_uri("/keys/alice").unwrap()).unwrap();
        let data = signed_sample(&signer);

        let other = KeyChain::with_generated_key(Name::from_uri("/keys/alice").unwrap()).unwrap();
        assert!(!other.verify(&data));
    }

    #[test]
    fn anchorless_accepts_well_formed_ed25519_only() {
        let signer = KeyChain::with_generated_key(Name::from_uri("/keys/alice").unwrap()).unwrap();
        let data = signed_sample(&signer);

        let anchorless = KeyChain::new();
        assert!(anchorless.verify(&data));

        let mut malformed = data.clone();
        malformed.signature_value.truncate(10);
        assert!(!anchorless.verify(&malformed));
    }
}
