//! Identity rewriting over the decoded manifest stream
//!
//! A single in-order pass with tagged dispatch on element/attribute
//! names. Injection that must happen "at element close" (missing
//! `<application>` flags, the storage permission that follows
//! `READ_EXTERNAL_STORAGE`) is tracked in small per-element state
//! records pushed on the walk stack.

use crate::document::{Attribute, AttributeValue, Document, Node};
use apkforge_errors::Result;
use apkforge_types::{PackageIdentity, COMPILE_SDK_CODENAME, COMPILE_SDK_VERSION};

const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

const EL_MANIFEST: &str = "manifest";
const EL_APPLICATION: &str = "application";
const EL_PERMISSION: &str = "permission";
const EL_USES_PERMISSION: &str = "uses-permission";
const EL_ACTIVITY_ALIAS: &str = "activity-alias";
const EL_PROVIDER: &str = "provider";

const ATTR_PACKAGE: &str = "package";
const ATTR_COMPILE_SDK_VERSION: &str = "compileSdkVersion";
const ATTR_COMPILE_SDK_CODENAME: &str = "compileSdkVersionCodename";
const ATTR_NAME: &str = "name";
const ATTR_LABEL: &str = "label";
const ATTR_DEBUGGABLE: &str = "debuggable";
const ATTR_MAX_SDK_VERSION: &str = "maxSdkVersion";
const ATTR_CLEARTEXT: &str = "usesCleartextTraffic";
const ATTR_LEGACY_STORAGE: &str = "requestLegacyExternalStorage";
const ATTR_AUTHORITIES: &str = "authorities";

// Framework resource ids for attribute names this pass may inject.
const RES_NAME: u32 = 0x0101_0003;
const RES_DEBUGGABLE: u32 = 0x0101_000f;
const RES_CLEARTEXT: u32 = 0x0101_04ec;
const RES_LEGACY_STORAGE: u32 = 0x0101_0603;

const READ_EXTERNAL_STORAGE: &str = "android.permission.READ_EXTERNAL_STORAGE";
const MANAGE_EXTERNAL_STORAGE: &str = "android.permission.MANAGE_EXTERNAL_STORAGE";

/// Rewrite state for one open `<application>` element. Each flag flips
/// to `false` the instant the real attribute is observed; whatever is
/// still `true` at element close gets injected.
#[derive(Debug, Clone, Copy)]
struct ApplicationState {
    needs_debuggable: bool,
    needs_cleartext: bool,
    needs_legacy_storage: bool,
}

/// One open element on the walk stack.
#[derive(Debug)]
struct Frame {
    name: String,
    /// Index of the element's start node in the output stream, so
    /// close-time injection can reach its attribute list.
    out_index: usize,
    application: Option<ApplicationState>,
    /// Set on the `uses-permission` frame that names
    /// `READ_EXTERNAL_STORAGE`, arming the one-shot insertion.
    storage_anchor: bool,
}

/// Patch a binary manifest to the given identity.
///
/// # Errors
///
/// Fails with a parse error on malformed input; there is no
/// partial-output recovery.
pub fn patch_identity(bytes: &[u8], identity: &PackageIdentity) -> Result<Vec<u8>> {
    let doc = Document::decode(bytes)?;
    let mut out: Vec<Node> = Vec::with_capacity(doc.nodes.len() + 2);
    let mut stack: Vec<Frame> = Vec::new();
    // One-shot: cleared the moment the storage permission is inserted.
    let mut insert_storage_permission = true;

    for node in doc.nodes {
        match node {
            Node::StartElement {
                line,
                namespace,
                name,
                mut attributes,
            } => {
                let mut frame = Frame {
                    name: name.clone(),
                    out_index: out.len(),
                    application: None,
                    storage_anchor: false,
                };

                match name.as_str() {
                    EL_MANIFEST if stack.is_empty() => {
                        rewrite_root(&mut attributes, identity);
                    }
                    EL_PERMISSION => {
                        requalify_values(&mut attributes, identity);
                    }
                    EL_USES_PERMISSION => {
                        attributes.retain(|attr| {
                            !(attr.name == ATTR_MAX_SDK_VERSION && is_android(attr))
                        });
                        requalify_values(&mut attributes, identity);
                        if insert_storage_permission
                            && permission_name(&attributes) == Some(READ_EXTERNAL_STORAGE)
                        {
                            frame.storage_anchor = true;
                        }
                    }
                    EL_APPLICATION => {
                        frame.application = Some(rewrite_application(&mut attributes, identity));
                    }
                    EL_ACTIVITY_ALIAS => {
                        rewrite_alias_label(&mut attributes, identity);
                    }
                    EL_PROVIDER => {
                        rewrite_authorities(&mut attributes, identity);
                    }
                    _ => {}
                }

                stack.push(frame);
                out.push(Node::StartElement {
                    line,
                    namespace,
                    name,
                    attributes,
                });
            }
            Node::EndElement {
                line,
                namespace,
                name,
            } => {
                // Balance was validated by the decoder.
                let frame = stack.pop().unwrap_or_else(|| {
                    unreachable!("decoder admitted unbalanced element stream")
                });
                debug_assert_eq!(frame.name, name, "end tag mirrors its start tag");

                if let Some(state) = frame.application {
                    inject_missing_application_flags(&mut out, frame.out_index, state, identity);
                }

                out.push(Node::EndElement {
                    line,
                    namespace,
                    name,
                });

                if frame.storage_anchor && insert_storage_permission {
                    insert_storage_permission = false;
                    out.push(storage_permission_start(line));
                    out.push(node_end(line, EL_USES_PERMISSION.to_string()));
                }
            }
            other => out.push(other),
        }
    }

    Document { nodes: out }.encode()
}

/// Rewrite only the root `package` attribute, leaving everything else
/// untouched. Used when plain renaming is needed without a full
/// identity patch.
///
/// # Errors
///
/// Fails with a parse error on malformed input.
pub fn rename_package(bytes: &[u8], target_package: &str) -> Result<Vec<u8>> {
    let mut doc = Document::decode(bytes)?;
    let mut depth = 0usize;
    for node in &mut doc.nodes {
        match node {
            Node::StartElement {
                name, attributes, ..
            } => {
                if depth == 0 && name == EL_MANIFEST {
                    for attr in attributes.iter_mut() {
                        if attr.name == ATTR_PACKAGE && attr.namespace.is_none() {
                            set_string(attr, target_package.to_string());
                        }
                    }
                }
                depth += 1;
            }
            Node::EndElement { .. } => depth -= 1,
            _ => {}
        }
    }
    doc.encode()
}

fn is_android(attr: &Attribute) -> bool {
    attr.namespace.as_deref() == Some(ANDROID_NS)
}

fn set_string(attr: &mut Attribute, value: String) {
    attr.raw_value = Some(value.clone());
    attr.value = AttributeValue::Str(value);
}

fn permission_name(attributes: &[Attribute]) -> Option<&str> {
    attributes
        .iter()
        .find(|attr| attr.name == ATTR_NAME && is_android(attr))
        .and_then(|attr| match &attr.value {
            AttributeValue::Str(s) => Some(s.as_str()),
            _ => None,
        })
}

fn rewrite_root(attributes: &mut [Attribute], identity: &PackageIdentity) {
    for attr in attributes {
        match attr.name.as_str() {
            ATTR_PACKAGE if attr.namespace.is_none() => {
                set_string(attr, identity.target_package.clone());
            }
            // Pinned so the patched package always claims a toolchain the
            // target OS accepts.
            ATTR_COMPILE_SDK_VERSION if is_android(attr) => {
                attr.raw_value = None;
                #[allow(clippy::cast_possible_wrap)]
                {
                    attr.value = AttributeValue::IntDec(COMPILE_SDK_VERSION as i32);
                }
            }
            ATTR_COMPILE_SDK_CODENAME if is_android(attr) => {
                set_string(attr, COMPILE_SDK_CODENAME.to_string());
            }
            _ => {}
        }
    }
}

/// Requalify string values that name the source package (bare or
/// dot-qualified, e.g. the dynamic-receiver permission) into the target
/// namespace. Everything else passes through unchanged.
fn requalify_values(attributes: &mut [Attribute], identity: &PackageIdentity) {
    for attr in attributes {
        if let AttributeValue::Str(s) = &attr.value {
            if let Some(requalified) = identity.requalify(s) {
                set_string(attr, requalified);
            }
        }
    }
}

fn rewrite_application(
    attributes: &mut [Attribute],
    identity: &PackageIdentity,
) -> ApplicationState {
    let mut state = ApplicationState {
        needs_debuggable: true,
        needs_cleartext: true,
        needs_legacy_storage: true,
    };
    for attr in attributes {
        if !is_android(attr) {
            continue;
        }
        match attr.name.as_str() {
            ATTR_LABEL => set_string(attr, identity.display_name.clone()),
            ATTR_DEBUGGABLE => {
                attr.value = AttributeValue::Boolean(identity.debuggable);
                state.needs_debuggable = false;
            }
            ATTR_CLEARTEXT => {
                attr.value = AttributeValue::Boolean(true);
                state.needs_cleartext = false;
            }
            ATTR_LEGACY_STORAGE => {
                attr.value = AttributeValue::Boolean(true);
                state.needs_legacy_storage = false;
            }
            _ => {}
        }
    }
    state
}

fn inject_missing_application_flags(
    out: &mut [Node],
    start_index: usize,
    state: ApplicationState,
    identity: &PackageIdentity,
) {
    let Node::StartElement { attributes, .. } = &mut out[start_index] else {
        unreachable!("frame out_index always addresses a start element")
    };
    let mut inject = |name: &str, resource_id: u32, value: bool| {
        attributes.push(Attribute {
            namespace: Some(ANDROID_NS.to_string()),
            name: name.to_string(),
            resource_id: Some(resource_id),
            raw_value: None,
            value: AttributeValue::Boolean(value),
        });
    };
    if state.needs_debuggable {
        inject(ATTR_DEBUGGABLE, RES_DEBUGGABLE, identity.debuggable);
    }
    if state.needs_cleartext {
        inject(ATTR_CLEARTEXT, RES_CLEARTEXT, true);
    }
    if state.needs_legacy_storage {
        inject(ATTR_LEGACY_STORAGE, RES_LEGACY_STORAGE, true);
    }
}

/// Alias labels are overwritten with the display name as a string,
/// regardless of how the original encoded them (often a resource
/// reference).
fn rewrite_alias_label(attributes: &mut [Attribute], identity: &PackageIdentity) {
    for attr in attributes {
        if attr.name == ATTR_LABEL && is_android(attr) {
            set_string(attr, identity.display_name.clone());
        }
    }
}

/// Authorities are dot-joined with arbitrary suffixes, so this is a
/// substring substitution rather than a whole-value match.
fn rewrite_authorities(attributes: &mut [Attribute], identity: &PackageIdentity) {
    for attr in attributes {
        if attr.name == ATTR_AUTHORITIES && is_android(attr) {
            if let AttributeValue::Str(s) = &attr.value {
                if s.contains(&identity.source_package) {
                    let replaced =
                        s.replace(&identity.source_package, &identity.target_package);
                    set_string(attr, replaced);
                }
            }
        }
    }
}

fn storage_permission_start(line: u32) -> Node {
    Node::StartElement {
        line,
        namespace: None,
        name: EL_USES_PERMISSION.to_string(),
        attributes: vec![Attribute {
            namespace: Some(ANDROID_NS.to_string()),
            name: ATTR_NAME.to_string(),
            resource_id: Some(RES_NAME),
            raw_value: Some(MANAGE_EXTERNAL_STORAGE.to_string()),
            value: AttributeValue::Str(MANAGE_EXTERNAL_STORAGE.to_string()),
        }],
    }
}

fn node_end(line: u32, name: String) -> Node {
    Node::EndElement {
        line,
        namespace: None,
        name,
    }
}
