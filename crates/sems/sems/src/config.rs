//! Engine configuration

use derive_more::Display;
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::{constants::aid, storage::COMMENT_PREFIX};

/// Digest applied to the caller identity before it is registered on the card
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestAlgorithm {
    /// SHA-1
    #[display("SHA-1")]
    Sha1,
    /// SHA-256
    #[default]
    #[display("SHA-256")]
    Sha256,
}

impl DigestAlgorithm {
    /// Digest `data`
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Configuration of the script engine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SemsConfig {
    /// AID of the script processor
    #[serde(with = "hex")]
    pub primary_aid: Vec<u8>,
    /// AID tried when the primary application cannot be selected
    #[serde(with = "hex")]
    pub updater_aid: Vec<u8>,
    /// Digest used for the caller identity
    pub digest: DigestAlgorithm,
    /// Lines of stored scripts starting with this prefix are ignored
    pub comment_prefix: String,
}

impl Default for SemsConfig {
    fn default() -> Self {
        Self {
            primary_aid: aid::PRIMARY.to_vec(),
            updater_aid: aid::UPDATER.to_vec(),
            digest: DigestAlgorithm::default(),
            comment_prefix: COMMENT_PREFIX.to_string(),
        }
    }
}

impl SemsConfig {
    /// Candidate AIDs to select, starting with `requested`, without duplicates
    pub fn candidate_aids(&self, requested: Option<&[u8]>) -> Vec<Vec<u8>> {
        let mut candidates: Vec<Vec<u8>> = Vec::with_capacity(3);
        for aid in requested
            .into_iter()
            .chain([self.primary_aid.as_slice(), self.updater_aid.as_slice()])
        {
            if !aid.is_empty() && !candidates.iter().any(|c| c == aid) {
                candidates.push(aid.to_vec());
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_digests() {
        assert_eq!(
            DigestAlgorithm::Sha1.digest(b"abc"),
            hex!("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        assert_eq!(
            DigestAlgorithm::Sha256.digest(b"abc"),
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(DigestAlgorithm::Sha1.to_string(), "SHA-1");
    }

    #[test]
    fn test_candidate_aids() {
        let config = SemsConfig::default();
        assert_eq!(
            config.candidate_aids(None),
            vec![aid::PRIMARY.to_vec(), aid::UPDATER.to_vec()]
        );
        assert_eq!(
            config.candidate_aids(Some(&aid::UPDATER[..])),
            vec![aid::UPDATER.to_vec(), aid::PRIMARY.to_vec()]
        );
        assert_eq!(config.candidate_aids(Some(&hex!("A001")[..]))[0], hex!("A001").to_vec());
    }
}
