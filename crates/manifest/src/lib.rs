#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Binary manifest (AXML) decoding, encoding, and identity rewriting
//!
//! The binary manifest is a compact encoding of an XML document: a string
//! pool, a resource-id table mapping attribute-name strings to framework
//! resource ids, and a flat stream of namespace/element nodes. This crate
//! decodes that stream into a resolved [`Document`], applies the identity
//! rewrite rules, and re-encodes it with a rebuilt string pool.
//!
//! Only the element and attribute shapes needed for identity rewriting
//! are handled; anything unrecognized fails decoding fast, with no
//! partial output.

mod axml;
mod document;
mod rewrite;

pub use document::{Attribute, AttributeValue, Document, Node};
pub use rewrite::{patch_identity, rename_package};
