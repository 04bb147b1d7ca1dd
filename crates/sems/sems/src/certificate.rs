//! Script certificates and the trust anchors they are matched against

use bytes::Bytes;

use crate::{
    constants::{MAX_FRAME, PUBLIC_KEY_BLOCK_LEN, SIGNATURE_BLOCK_LEN, tags},
    tlv::{self, Tag, TlvNode},
};

/// Fields every usable certificate must carry
const MANDATORY_FIELDS: [Tag; 8] = [
    tags::IDENTITY,
    tags::ROOT_KEY_ID,
    tags::SUBJECT_KEY_ID,
    tags::KEY_USAGE,
    tags::SECOND_ROOT_KEY_ID,
    tags::DISCRETIONARY_DATA,
    tags::SIGNATURE,
    tags::PUBLIC_KEY,
];

/// Key identifiers announced by the on-card application in its SELECT response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchors {
    /// Root entity key identifier
    pub root_key_id: Bytes,
    /// Second root entity key identifier
    pub second_root_key_id: Bytes,
}

impl TrustAnchors {
    /// Extract the anchors from a SELECT response payload
    ///
    /// The identifiers live in the proprietary template of the FCI
    /// (`6F` / `A5` / `42` and `45`).
    pub fn from_select_response(payload: &[u8]) -> Option<Self> {
        let nodes = tlv::decode(payload);
        let proprietary = tlv::find(&nodes, tags::FCI)?.find(tags::FCI_PROPRIETARY)?;

        Some(Self {
            root_key_id: proprietary.find(tags::ROOT_KEY_ID)?.value().clone(),
            second_root_key_id: proprietary.find(tags::SECOND_ROOT_KEY_ID)?.value().clone(),
        })
    }
}

/// A certificate frame taken from a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    node: TlvNode,
}

impl Certificate {
    /// Wrap a certificate frame, rejecting nodes of any other tag
    pub fn from_node(node: &TlvNode) -> Option<Self> {
        (node.tag() == tags::CERTIFICATE && node.is_constructed())
            .then(|| Self { node: node.clone() })
    }

    /// Value of a top-level certificate field
    pub fn field(&self, tag: Tag) -> Option<&Bytes> {
        self.node.find(tag).map(TlvNode::value)
    }

    /// Whether all mandatory fields, including the public key point, are present
    pub fn is_complete(&self) -> bool {
        MANDATORY_FIELDS.iter().all(|tag| self.node.find(*tag).is_some())
            && self
                .node
                .find(tags::PUBLIC_KEY)
                .and_then(|key| key.find(tags::PUBLIC_KEY_POINT))
                .is_some()
    }

    /// Whether both root key identifiers equal the card's anchors
    pub fn matches(&self, anchors: &TrustAnchors) -> bool {
        self.field(tags::ROOT_KEY_ID) == Some(&anchors.root_key_id)
            && self.field(tags::SECOND_ROOT_KEY_ID) == Some(&anchors.second_root_key_id)
    }

    /// The embedded delay hint structure, if any
    pub fn delay_hint(&self) -> Option<&TlvNode> {
        self.node.find(tags::DELAY_HINT)
    }

    /// Encoded certificate frame as uploaded to the card
    pub fn encoded(&self) -> Bytes {
        self.node.encode()
    }

    /// Split the encoded certificate into upload fragments
    ///
    /// A certificate fitting one frame is sent whole. Otherwise it is cut at
    /// the delay hint, or when there is none, in front of the signature and
    /// public key blocks. If the tail still does not fit one frame and a hint
    /// exists, the hint travels alone and the rest follows in a third
    /// fragment.
    pub fn fragments(&self) -> Vec<Bytes> {
        let encoded = self.encoded();
        if encoded.len() <= MAX_FRAME {
            return vec![encoded];
        }

        let hint = tlv::tag_offset(&encoded, tags::DELAY_HINT).and_then(|offset| {
            self.delay_hint()
                .map(|hint| (offset, offset + hint.encode().len()))
        });

        let split = hint.map_or_else(
            || encoded.len().saturating_sub(SIGNATURE_BLOCK_LEN + PUBLIC_KEY_BLOCK_LEN),
            |(start, _)| start,
        );

        let head = encoded.slice(..split);
        let rest = encoded.slice(split..);

        match hint {
            Some((start, end)) if rest.len() > MAX_FRAME => {
                vec![head, encoded.slice(start..end), encoded.slice(end..)]
            }
            _ => vec![head, rest],
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hex_literal::hex;

    pub(crate) const ROOT_KEY_ID: [u8; 8] = hex!("0102030405060708");
    pub(crate) const SECOND_ROOT_KEY_ID: [u8; 8] = hex!("1112131415161718");

    /// Build a certificate with the mandatory fields, an optional delay hint
    /// and `padding` bytes of discretionary data after it
    pub(crate) fn certificate(hint: Option<TlvNode>, padding: usize) -> TlvNode {
        let mut children = vec![
            TlvNode::primitive(tags::IDENTITY, hex!("0A0B0C0D").to_vec()),
            TlvNode::primitive(tags::ROOT_KEY_ID, ROOT_KEY_ID.to_vec()),
            TlvNode::primitive(tags::SUBJECT_KEY_ID, hex!("2122232425262728").to_vec()),
            TlvNode::primitive(tags::KEY_USAGE, hex!("0080").to_vec()),
            TlvNode::primitive(tags::SECOND_ROOT_KEY_ID, SECOND_ROOT_KEY_ID.to_vec()),
        ];
        children.extend(hint);
        children.push(TlvNode::primitive(tags::DISCRETIONARY_DATA, vec![0x53; padding]));
        children.push(TlvNode::primitive(tags::SIGNATURE, vec![0x5A; 64]));
        children.push(TlvNode::constructed(
            tags::PUBLIC_KEY,
            vec![TlvNode::primitive(tags::PUBLIC_KEY_POINT, vec![0x04; 65])],
        ));
        TlvNode::constructed(tags::CERTIFICATE, children)
    }

    pub(crate) fn select_response(root: &[u8], second: &[u8]) -> Vec<u8> {
        let proprietary = TlvNode::constructed(
            tags::FCI_PROPRIETARY,
            vec![
                TlvNode::primitive(tags::ROOT_KEY_ID, root.to_vec()),
                TlvNode::primitive(tags::SECOND_ROOT_KEY_ID, second.to_vec()),
            ],
        );
        TlvNode::constructed(tags::FCI, vec![proprietary]).encode().to_vec()
    }

    fn hint() -> TlvNode {
        TlvNode::constructed(
            tags::DELAY_HINT,
            vec![
                TlvNode::primitive(tags::DELAY_HINT_APP_ID, vec![0xA0; 12]),
                TlvNode::primitive(tags::DELAY_HINT_ORDINAL, vec![0x02]),
                TlvNode::primitive(tags::DELAY_HINT_MILLIS, vec![0x00, 0x32]),
            ],
        )
    }

    #[test]
    fn test_trust_anchors_from_select_response() {
        let anchors =
            TrustAnchors::from_select_response(&select_response(&ROOT_KEY_ID, &SECOND_ROOT_KEY_ID))
                .unwrap();
        assert_eq!(anchors.root_key_id.as_ref(), &ROOT_KEY_ID);
        assert_eq!(anchors.second_root_key_id.as_ref(), &SECOND_ROOT_KEY_ID);

        assert!(TrustAnchors::from_select_response(&hex!("6F03840100")).is_none());
        assert!(TrustAnchors::from_select_response(&[]).is_none());
    }

    #[test]
    fn test_matching_and_completeness() {
        let cert = Certificate::from_node(&certificate(None, 4)).unwrap();
        assert!(cert.is_complete());

        let anchors = TrustAnchors {
            root_key_id: Bytes::copy_from_slice(&ROOT_KEY_ID),
            second_root_key_id: Bytes::copy_from_slice(&SECOND_ROOT_KEY_ID),
        };
        assert!(cert.matches(&anchors));

        let other = TrustAnchors {
            root_key_id: Bytes::copy_from_slice(&ROOT_KEY_ID),
            second_root_key_id: Bytes::from_static(&[0xFF]),
        };
        assert!(!cert.matches(&other));

        let incomplete = TlvNode::constructed(
            tags::CERTIFICATE,
            vec![TlvNode::primitive(tags::ROOT_KEY_ID, ROOT_KEY_ID.to_vec())],
        );
        assert!(!Certificate::from_node(&incomplete).unwrap().is_complete());
        assert!(
            Certificate::from_node(&TlvNode::primitive(tags::SECURE_COMMAND, vec![])).is_none()
        );
    }

    #[test]
    fn test_small_certificate_is_one_fragment() {
        let cert = Certificate::from_node(&certificate(None, 4)).unwrap();
        let fragments = cert.fragments();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0], cert.encoded());
    }

    #[test]
    fn test_large_certificate_with_hint_is_three_fragments() {
        let cert = Certificate::from_node(&certificate(Some(hint()), 180)).unwrap();
        let encoded = cert.encoded();
        assert!(encoded.len() > MAX_FRAME);

        let fragments = cert.fragments();
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[1], cert.delay_hint().unwrap().encode());
        assert_eq!(fragments.concat(), encoded.to_vec());
    }

    #[test]
    fn test_large_certificate_without_hint_is_two_fragments() {
        let cert = Certificate::from_node(&certificate(None, 180)).unwrap();
        let encoded = cert.encoded();
        assert!(encoded.len() > MAX_FRAME);

        let fragments = cert.fragments();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].len(), SIGNATURE_BLOCK_LEN + PUBLIC_KEY_BLOCK_LEN);
        assert_eq!(&fragments[1][..2], &hex!("5F37"));
        assert_eq!(fragments.concat(), encoded.to_vec());
    }

    #[test]
    fn test_hint_with_small_tail_is_two_fragments() {
        // Tail after the hint split fits a single frame
        let cert = Certificate::from_node(&certificate(Some(hint()), 60)).unwrap();
        assert!(cert.encoded().len() > MAX_FRAME);

        let fragments = cert.fragments();
        assert_eq!(fragments.len(), 2);
        assert_eq!(&fragments[1][..1], &hex!("73"));
    }
}
