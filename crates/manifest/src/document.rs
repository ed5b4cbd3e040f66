//! Resolved binary-manifest document
//!
//! Decoding resolves every string-pool reference up front, so rewrite
//! passes work on owned strings instead of pool indices. Encoding
//! rebuilds the pool from scratch: attribute names that carry framework
//! resource ids come first (the resource-id table maps pool index `i` to
//! id `i`), followed by every other referenced string in first-use order.

use crate::axml::{
    self, parse_error, patch_chunk_size, value_type, ChunkHeader, NodeHeader, RawAttribute,
    RawStartElement,
};
use apkforge_errors::{ManifestError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Seek, SeekFrom};

/// Typed attribute value, the subset of encodings identity rewriting
/// needs to understand. Everything else passes through as `Raw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Str(String),
    Boolean(bool),
    IntDec(i32),
    IntHex(u32),
    Reference(u32),
    Raw { data_type: u8, data: u32 },
}

/// One decoded attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Namespace URI, `None` for unqualified attributes like `package`.
    pub namespace: Option<String>,
    pub name: String,
    /// Framework resource id tied to the attribute name, when present in
    /// the source resource-id table (or required for an injected name).
    pub resource_id: Option<u32>,
    /// The untyped string slot; mirrors the typed value for string
    /// attributes and is occasionally populated alongside other types.
    pub raw_value: Option<String>,
    pub value: AttributeValue,
}

impl Attribute {
    /// A plain string attribute with no resource id (e.g. root `package`).
    #[must_use]
    pub fn plain(name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            namespace: None,
            name: name.into(),
            resource_id: None,
            raw_value: Some(value.clone()),
            value: AttributeValue::Str(value),
        }
    }
}

/// One node of the flat document stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    StartNamespace {
        line: u32,
        prefix: String,
        uri: String,
    },
    EndNamespace {
        line: u32,
        prefix: String,
        uri: String,
    },
    StartElement {
        line: u32,
        namespace: Option<String>,
        name: String,
        attributes: Vec<Attribute>,
    },
    EndElement {
        line: u32,
        namespace: Option<String>,
        name: String,
    },
}

/// An ordered tree of namespace and element nodes decoded from the
/// binary manifest encoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub nodes: Vec<Node>,
}

impl Document {
    /// Decode a binary manifest.
    ///
    /// # Errors
    ///
    /// Fails fast with a parse error on any malformed structure:
    /// unknown chunk types, out-of-range string references, unbalanced
    /// element nesting, or truncated input.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(bytes);
        let doc_header = ChunkHeader::read(&mut r)?;
        if doc_header.ty != axml::CHUNK_XML {
            return Err(parse_error(format!(
                "not a binary XML document (type 0x{:04x})",
                doc_header.ty
            ))
            .into());
        }
        let doc_end = u64::from(doc_header.size).min(bytes.len() as u64);

        let mut strings: Option<Vec<String>> = None;
        let mut resource_map: Vec<u32> = Vec::new();
        let mut nodes = Vec::new();
        let mut depth = 0usize;

        while r.position() < doc_end {
            let chunk_start = r.position();
            let header = ChunkHeader::read(&mut r)?;
            let chunk_end = chunk_start + u64::from(header.size);
            if header.size < 8 || chunk_end > doc_end {
                return Err(parse_error("chunk overruns document").into());
            }

            match header.ty {
                axml::CHUNK_STRING_POOL => {
                    if strings.is_some() {
                        return Err(parse_error("duplicate string pool").into());
                    }
                    strings = Some(axml::read_string_pool(&mut r, chunk_start, header)?);
                }
                axml::CHUNK_RESOURCE_MAP => {
                    let count = (header.size - u32::from(header.header_size)) / 4;
                    for _ in 0..count {
                        resource_map.push(read_u32(&mut r)?);
                    }
                }
                axml::CHUNK_START_NAMESPACE | axml::CHUNK_END_NAMESPACE => {
                    let pool = strings
                        .as_ref()
                        .ok_or_else(|| parse_error("node before string pool"))?;
                    let node = NodeHeader::read(&mut r)?;
                    let prefix = read_i32(&mut r)?;
                    let uri = read_i32(&mut r)?;
                    let prefix = resolve(pool, prefix)?;
                    let uri = resolve(pool, uri)?;
                    nodes.push(if header.ty == axml::CHUNK_START_NAMESPACE {
                        Node::StartNamespace {
                            line: node.line_number,
                            prefix,
                            uri,
                        }
                    } else {
                        Node::EndNamespace {
                            line: node.line_number,
                            prefix,
                            uri,
                        }
                    });
                }
                axml::CHUNK_START_ELEMENT => {
                    let pool = strings
                        .as_ref()
                        .ok_or_else(|| parse_error("node before string pool"))?;
                    let node = NodeHeader::read(&mut r)?;
                    let element = RawStartElement::read(&mut r)?;
                    let mut attributes = Vec::with_capacity(element.attribute_count as usize);
                    for _ in 0..element.attribute_count {
                        let raw = RawAttribute::read(&mut r)?;
                        attributes.push(decode_attribute(pool, &resource_map, raw)?);
                    }
                    nodes.push(Node::StartElement {
                        line: node.line_number,
                        namespace: resolve_opt(pool, element.namespace)?,
                        name: resolve(pool, element.name)?,
                        attributes,
                    });
                    depth += 1;
                }
                axml::CHUNK_END_ELEMENT => {
                    let pool = strings
                        .as_ref()
                        .ok_or_else(|| parse_error("node before string pool"))?;
                    let node = NodeHeader::read(&mut r)?;
                    let namespace = read_i32(&mut r)?;
                    let name = read_i32(&mut r)?;
                    if depth == 0 {
                        return Err(parse_error("unbalanced end element").into());
                    }
                    depth -= 1;
                    nodes.push(Node::EndElement {
                        line: node.line_number,
                        namespace: resolve_opt(pool, namespace)?,
                        name: resolve(pool, name)?,
                    });
                }
                ty => {
                    return Err(ManifestError::UnknownChunk {
                        ty,
                        offset: chunk_start,
                    }
                    .into());
                }
            }

            r.seek(SeekFrom::Start(chunk_end))?;
        }

        if depth != 0 {
            return Err(parse_error("unclosed element at end of document").into());
        }

        Ok(Self { nodes })
    }

    /// Encode the document back into the binary manifest format.
    ///
    /// # Errors
    ///
    /// Fails only when the document cannot be represented (oversized
    /// pool or chunk).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let pool = PoolBuilder::build(self);
        let mut w = Cursor::new(Vec::new());

        ChunkHeader {
            ty: axml::CHUNK_XML,
            header_size: 8,
            size: 0,
        }
        .write(&mut w)?;

        axml::write_string_pool(&mut w, &pool.strings)?;

        if !pool.resource_ids.is_empty() {
            let ids = u32::try_from(pool.resource_ids.len()).map_err(|_| {
                ManifestError::Encode {
                    message: "resource map too large".to_string(),
                }
            })?;
            ChunkHeader {
                ty: axml::CHUNK_RESOURCE_MAP,
                header_size: 8,
                size: 8 + 4 * ids,
            }
            .write(&mut w)?;
            for id in &pool.resource_ids {
                w.write_u32::<LittleEndian>(*id)?;
            }
        }

        for node in &self.nodes {
            write_node(&mut w, &pool, node)?;
        }

        let end = w.position();
        patch_chunk_size(&mut w, 0, end)?;
        Ok(w.into_inner())
    }
}

fn read_u32(r: &mut Cursor<&[u8]>) -> Result<u32> {
    r.read_u32::<LittleEndian>()
        .map_err(|_| parse_error("unexpected end of input").into())
}

fn read_i32(r: &mut Cursor<&[u8]>) -> Result<i32> {
    r.read_i32::<LittleEndian>()
        .map_err(|_| parse_error("unexpected end of input").into())
}

fn resolve(pool: &[String], index: i32) -> Result<String> {
    usize::try_from(index)
        .ok()
        .and_then(|i| pool.get(i))
        .cloned()
        .ok_or_else(|| ManifestError::BadStringRef { index }.into())
}

fn resolve_opt(pool: &[String], index: i32) -> Result<Option<String>> {
    if index < 0 {
        return Ok(None);
    }
    resolve(pool, index).map(Some)
}

fn decode_attribute(pool: &[String], resource_map: &[u32], raw: RawAttribute) -> Result<Attribute> {
    let name_index = usize::try_from(raw.name).ok();
    let resource_id = name_index.and_then(|i| resource_map.get(i)).copied();
    #[allow(clippy::cast_possible_wrap)]
    let value = match raw.data_type {
        value_type::STRING => {
            AttributeValue::Str(resolve(pool, i32::try_from(raw.data).map_err(|_| {
                ManifestError::BadStringRef {
                    index: i32::MIN,
                }
            })?)?)
        }
        value_type::BOOLEAN => AttributeValue::Boolean(raw.data != 0),
        value_type::INT_DEC => AttributeValue::IntDec(raw.data as i32),
        value_type::INT_HEX => AttributeValue::IntHex(raw.data),
        value_type::REFERENCE => AttributeValue::Reference(raw.data),
        data_type => AttributeValue::Raw {
            data_type,
            data: raw.data,
        },
    };
    Ok(Attribute {
        namespace: resolve_opt(pool, raw.namespace)?,
        name: resolve(pool, raw.name)?,
        resource_id,
        raw_value: resolve_opt(pool, raw.raw_value)?,
        value,
    })
}

fn write_node(w: &mut Cursor<Vec<u8>>, pool: &PoolBuilder, node: &Node) -> Result<()> {
    match node {
        Node::StartNamespace { line, prefix, uri } | Node::EndNamespace { line, prefix, uri } => {
            let ty = if matches!(node, Node::StartNamespace { .. }) {
                axml::CHUNK_START_NAMESPACE
            } else {
                axml::CHUNK_END_NAMESPACE
            };
            ChunkHeader {
                ty,
                header_size: 16,
                size: 24,
            }
            .write(w)?;
            NodeHeader {
                line_number: *line,
                comment: -1,
            }
            .write(w)?;
            w.write_i32::<LittleEndian>(pool.index(prefix))?;
            w.write_i32::<LittleEndian>(pool.index(uri))?;
        }
        Node::StartElement {
            line,
            namespace,
            name,
            attributes,
        } => {
            let count = u16::try_from(attributes.len()).map_err(|_| ManifestError::Encode {
                message: format!("too many attributes on <{name}>"),
            })?;
            ChunkHeader {
                ty: axml::CHUNK_START_ELEMENT,
                header_size: 16,
                size: 36 + 20 * u32::from(count),
            }
            .write(w)?;
            NodeHeader {
                line_number: *line,
                comment: -1,
            }
            .write(w)?;
            RawStartElement {
                namespace: pool.index_opt(namespace.as_deref()),
                name: pool.index(name),
                attribute_count: count,
                id_index: 0,
                class_index: 0,
                style_index: 0,
            }
            .write(w)?;
            for attr in attributes {
                encode_attribute(pool, attr).write(w)?;
            }
        }
        Node::EndElement {
            line,
            namespace,
            name,
        } => {
            ChunkHeader {
                ty: axml::CHUNK_END_ELEMENT,
                header_size: 16,
                size: 24,
            }
            .write(w)?;
            NodeHeader {
                line_number: *line,
                comment: -1,
            }
            .write(w)?;
            w.write_i32::<LittleEndian>(pool.index_opt(namespace.as_deref()))?;
            w.write_i32::<LittleEndian>(pool.index(name))?;
        }
    }
    Ok(())
}

fn encode_attribute(pool: &PoolBuilder, attr: &Attribute) -> RawAttribute {
    #[allow(clippy::cast_sign_loss)]
    let (data_type, data) = match &attr.value {
        AttributeValue::Str(s) => (value_type::STRING, pool.index(s) as u32),
        AttributeValue::Boolean(true) => (value_type::BOOLEAN, u32::MAX),
        AttributeValue::Boolean(false) => (value_type::BOOLEAN, 0),
        AttributeValue::IntDec(i) => (value_type::INT_DEC, *i as u32),
        AttributeValue::IntHex(u) => (value_type::INT_HEX, *u),
        AttributeValue::Reference(r) => (value_type::REFERENCE, *r),
        AttributeValue::Raw { data_type, data } => (*data_type, *data),
    };
    RawAttribute {
        namespace: pool.index_opt(attr.namespace.as_deref()),
        name: pool.index(&attr.name),
        raw_value: pool.index_opt(attr.raw_value.as_deref()),
        data_type,
        data,
    }
}

/// Rebuilt string pool: resource-mapped attribute names occupy the first
/// indices, everything else follows in first-use order.
struct PoolBuilder {
    strings: Vec<String>,
    resource_ids: Vec<u32>,
    lookup: HashMap<String, i32>,
}

impl PoolBuilder {
    fn build(doc: &Document) -> Self {
        let mut pool = Self {
            strings: Vec::new(),
            resource_ids: Vec::new(),
            lookup: HashMap::new(),
        };

        // Pass 1: attribute names carrying resource ids.
        for node in &doc.nodes {
            if let Node::StartElement { attributes, .. } = node {
                for attr in attributes {
                    if let Some(id) = attr.resource_id {
                        pool.intern_mapped(&attr.name, id);
                    }
                }
            }
        }

        // Pass 2: everything else, in stream order.
        for node in &doc.nodes {
            match node {
                Node::StartNamespace { prefix, uri, .. }
                | Node::EndNamespace { prefix, uri, .. } => {
                    pool.intern(prefix);
                    pool.intern(uri);
                }
                Node::StartElement {
                    namespace,
                    name,
                    attributes,
                    ..
                } => {
                    if let Some(ns) = namespace {
                        pool.intern(ns);
                    }
                    pool.intern(name);
                    for attr in attributes {
                        if let Some(ns) = &attr.namespace {
                            pool.intern(ns);
                        }
                        pool.intern(&attr.name);
                        if let Some(raw) = &attr.raw_value {
                            pool.intern(raw);
                        }
                        if let AttributeValue::Str(s) = &attr.value {
                            pool.intern(s);
                        }
                    }
                }
                Node::EndElement {
                    namespace, name, ..
                } => {
                    if let Some(ns) = namespace {
                        pool.intern(ns);
                    }
                    pool.intern(name);
                }
            }
        }

        pool
    }

    fn intern_mapped(&mut self, name: &str, resource_id: u32) {
        if self.lookup.contains_key(name) {
            return;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let index = self.strings.len() as i32;
        self.strings.push(name.to_string());
        self.resource_ids.push(resource_id);
        self.lookup.insert(name.to_string(), index);
    }

    fn intern(&mut self, value: &str) {
        if self.lookup.contains_key(value) {
            return;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let index = self.strings.len() as i32;
        self.strings.push(value.to_string());
        self.lookup.insert(value.to_string(), index);
    }

    fn index(&self, value: &str) -> i32 {
        self.lookup.get(value).copied().unwrap_or_else(|| {
            // Every string reachable from the document was interned by
            // build(); a miss is a bug in the two-pass walk.
            unreachable!("string {value:?} missing from rebuilt pool")
        })
    }

    fn index_opt(&self, value: Option<&str>) -> i32 {
        value.map_or(-1, |v| self.index(v))
    }
}
