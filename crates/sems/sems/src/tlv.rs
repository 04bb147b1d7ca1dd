//! BER-TLV codec for script frames and certificate fields
//!
//! Only the subset used by the script protocol is supported: one or two byte
//! tags and lengths of up to four bytes. Decoding is tolerant: the first
//! malformed tag or length, or a value running past the end of the buffer,
//! silently ends the sequence and whatever was decoded before it is returned.

use bytes::{BufMut, Bytes, BytesMut};

/// A TLV tag, one or two bytes wide
pub type Tag = u16;

/// Bit marking a constructed tag in its first byte
const CONSTRUCTED: u8 = 0x20;

/// Low bits of the first tag byte announcing a second tag byte
const MULTI_BYTE_TAG: u8 = 0x1F;

/// Largest length the codec can express
pub const MAX_LENGTH: usize = 0xFFFF_FFFF;

/// A decoded TLV node
///
/// A node is either primitive (raw value, no children) or constructed, in
/// which case `value` is the concatenation of the encodings of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvNode {
    tag: Tag,
    value: Bytes,
    children: Option<Vec<TlvNode>>,
}

impl TlvNode {
    /// Create a primitive node
    pub fn primitive(tag: Tag, value: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: value.into(),
            children: None,
        }
    }

    /// Create a constructed node from its children
    pub fn constructed(tag: Tag, children: Vec<Self>) -> Self {
        let mut value = BytesMut::new();
        for child in &children {
            value.put(child.encode());
        }
        Self {
            tag,
            value: value.freeze(),
            children: Some(children),
        }
    }

    /// The node tag
    pub const fn tag(&self) -> Tag {
        self.tag
    }

    /// The raw value bytes
    pub const fn value(&self) -> &Bytes {
        &self.value
    }

    /// Child nodes of a constructed node
    pub fn children(&self) -> Option<&[Self]> {
        self.children.as_deref()
    }

    /// Whether the node was decoded as constructed
    pub const fn is_constructed(&self) -> bool {
        self.children.is_some()
    }

    /// First child carrying `tag`
    pub fn find(&self, tag: Tag) -> Option<&Self> {
        self.children().and_then(|children| find(children, tag))
    }

    /// Encoded form of this node
    pub fn encode(&self) -> Bytes {
        encode(self.tag, &self.value)
    }
}

/// Whether `tag` has the constructed bit set
pub const fn is_constructed_tag(tag: Tag) -> bool {
    let first = if tag > 0xFF { (tag >> 8) as u8 } else { tag as u8 };
    first & CONSTRUCTED != 0
}

/// Decode a buffer into its top-level nodes
pub fn decode(data: &[u8]) -> Vec<TlvNode> {
    decode_with(data, &[])
}

/// Decode a buffer, treating every tag in `primitive` as primitive
/// regardless of its constructed bit
pub fn decode_with(data: &[u8], primitive: &[Tag]) -> Vec<TlvNode> {
    let mut nodes = Vec::new();
    let mut reader = Reader::new(data);

    while !reader.is_empty() {
        let Some((tag, value)) = reader.next_node() else {
            break;
        };

        let children = (is_constructed_tag(tag) && !primitive.contains(&tag))
            .then(|| decode_with(value, primitive));

        nodes.push(TlvNode {
            tag,
            value: Bytes::copy_from_slice(value),
            children,
        });
    }

    nodes
}

/// Encode a tag and value
///
/// Values longer than [`MAX_LENGTH`] cannot be represented.
pub fn encode(tag: Tag, value: &[u8]) -> Bytes {
    let mut buffer = BytesMut::with_capacity(2 + 5 + value.len());
    if tag > 0xFF {
        buffer.put_u16(tag);
    } else {
        buffer.put_u8(tag as u8);
    }
    put_length(&mut buffer, value.len());
    buffer.put_slice(value);
    buffer.freeze()
}

fn put_length(buffer: &mut BytesMut, length: usize) {
    match length {
        0..=0x7F => buffer.put_u8(length as u8),
        0x80..=0xFF => {
            buffer.put_u8(0x81);
            buffer.put_u8(length as u8);
        }
        0x100..=0xFFFF => {
            buffer.put_u8(0x82);
            buffer.put_u16(length as u16);
        }
        0x1_0000..=0xFF_FFFF => {
            buffer.put_u8(0x83);
            buffer.put_uint(length as u64, 3);
        }
        _ => {
            buffer.put_u8(0x84);
            buffer.put_u32(length as u32);
        }
    }
}

/// First node carrying `tag` at this level
pub fn find(nodes: &[TlvNode], tag: Tag) -> Option<&TlvNode> {
    nodes.iter().find(|node| node.tag == tag)
}

/// Byte offset at which the first node with `tag` starts
///
/// Only headers are parsed: constructed nodes are entered and primitive
/// values are skipped, so nested nodes are found without materializing the
/// tree. Returns `None` when the tag is absent or the buffer is malformed
/// before it is reached.
pub fn tag_offset(data: &[u8], tag: Tag) -> Option<usize> {
    let mut reader = Reader::new(data);

    while !reader.is_empty() {
        let start = reader.position;
        let current = reader.read_tag()?;
        if current == tag {
            return Some(start);
        }
        let length = reader.read_length()?;
        if !is_constructed_tag(current) {
            reader.skip(length)?;
        }
    }

    None
}

/// Cursor over raw TLV bytes
struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    const fn is_empty(&self) -> bool {
        self.position >= self.data.len()
    }

    fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.position)?;
        self.position += 1;
        Some(byte)
    }

    fn read_tag(&mut self) -> Option<Tag> {
        let first = self.read_u8()?;
        if first & MULTI_BYTE_TAG == MULTI_BYTE_TAG {
            let second = self.read_u8()?;
            Some(Tag::from_be_bytes([first, second]))
        } else {
            Some(Tag::from(first))
        }
    }

    fn read_length(&mut self) -> Option<usize> {
        let first = self.read_u8()?;
        if first <= 0x7F {
            return Some(usize::from(first));
        }

        let count = first & 0x0F;
        if !(1..=4).contains(&count) {
            return None;
        }

        let mut length = 0usize;
        for _ in 0..count {
            length = (length << 8) | usize::from(self.read_u8()?);
        }
        Some(length)
    }

    fn skip(&mut self, length: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(length)?;
        let value = self.data.get(self.position..end)?;
        self.position = end;
        Some(value)
    }

    fn next_node(&mut self) -> Option<(Tag, &'a [u8])> {
        let tag = self.read_tag()?;
        let length = self.read_length()?;
        let value = self.skip(length)?;
        Some((tag, value))
    }
}
