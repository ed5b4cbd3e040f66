#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions shared across the apkforge pipeline

use serde::{Deserialize, Serialize};

pub use uuid::Uuid;

/// Compile SDK version stamped into every patched manifest, regardless of
/// what the source package was built against. Keeping this pinned avoids
/// installer-side compatibility rejections on older devices.
pub const COMPILE_SDK_VERSION: u32 = 34;

/// Codename paired with [`COMPILE_SDK_VERSION`].
pub const COMPILE_SDK_CODENAME: &str = "14";

/// Identifier for one in-flight patch-and-install operation.
pub type OperationId = Uuid;

/// The identity a package is re-targeted to.
///
/// Created once per installation/clone request and immutable for the
/// duration of one patch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentity {
    /// Package name the source manifest declares.
    pub source_package: String,
    /// Package name the patched manifest will declare.
    pub target_package: String,
    /// Human-readable application label for the patched package.
    pub display_name: String,
    /// Whether the patched package is marked debuggable.
    pub debuggable: bool,
}

impl PackageIdentity {
    /// Create an identity for re-targeting `source_package` to
    /// `target_package`.
    #[must_use]
    pub fn new(
        source_package: impl Into<String>,
        target_package: impl Into<String>,
        display_name: impl Into<String>,
        debuggable: bool,
    ) -> Self {
        Self {
            source_package: source_package.into(),
            target_package: target_package.into(),
            display_name: display_name.into(),
            debuggable,
        }
    }

    /// Requalify `value` from the source package namespace into the
    /// target namespace if it is exactly the source package name or a
    /// string qualified by it (`<source>.SUFFIX`).
    #[must_use]
    pub fn requalify(&self, value: &str) -> Option<String> {
        if value == self.source_package {
            return Some(self.target_package.clone());
        }
        value
            .strip_prefix(&self.source_package)
            .filter(|rest| rest.starts_with('.'))
            .map(|rest| format!("{}{rest}", self.target_package))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requalify_bare_package_name() {
        let id = PackageIdentity::new("com.example.app", "com.example.clone", "Clone", true);
        assert_eq!(
            id.requalify("com.example.app").as_deref(),
            Some("com.example.clone")
        );
    }

    #[test]
    fn requalify_qualified_permission() {
        let id = PackageIdentity::new("com.example.app", "com.example.clone", "Clone", true);
        assert_eq!(
            id.requalify("com.example.app.DYNAMIC_RECEIVER_NOT_EXPORTED_PERMISSION")
                .as_deref(),
            Some("com.example.clone.DYNAMIC_RECEIVER_NOT_EXPORTED_PERMISSION")
        );
    }

    #[test]
    fn requalify_leaves_unrelated_values() {
        let id = PackageIdentity::new("com.example.app", "com.example.clone", "Clone", true);
        assert_eq!(id.requalify("android.permission.INTERNET"), None);
        // A shared prefix without a dot boundary is a different package.
        assert_eq!(id.requalify("com.example.appx"), None);
    }
}
