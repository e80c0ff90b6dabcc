//! Path model — canonical Conan storage keys, and parsing/formatting of
//! package coordinates.
//!
//! A coordinate is the four-segment `name/version/user/channel` tuple.
//! `user` and `channel` default to the literal `_`.

use crate::error::{CoreError, Result};

/// Canonical recipe files expected beneath every recipe revision's `export/`
/// directory.
pub const PKG_SRC_LIST: &[&str] =
    &["conanmanifest.txt", "conan_export.tgz", "conanfile.py", "conan_sources.tgz"];

/// Canonical binary files expected beneath every binary revision directory.
pub const PKG_BIN_LIST: &[&str] = &["conanmanifest.txt", "conaninfo.txt", "conan_package.tgz"];

/// A parsed `name/version/user/channel` coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub name: String,
    pub version: String,
    pub user: String,
    pub channel: String,
}

impl Coordinate {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into(), user: "_".to_string(), channel: "_".to_string() }
    }

    /// Parse a coordinate from a slash-separated capture, as produced by the
    /// URL pattern registry's `path` capture. Accepts either the 2-segment
    /// form (`name/version`, user/channel default to `_`) or the full
    /// 4-segment form.
    pub fn parse(path: &str) -> Result<Self> {
        validate_key_segment(path)?;
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            [name, version] => Ok(Self::new(*name, *version)),
            [name, version, user, channel] => Ok(Self {
                name: name.to_string(),
                version: version.to_string(),
                user: user.to_string(),
                channel: channel.to_string(),
            }),
            _ => Err(CoreError::bad_request(format!("malformed coordinate: {path}"))),
        }
    }

    /// The storage key prefix for this coordinate: `name/version/user/channel`.
    pub fn root_key(&self) -> String {
        format!("{}/{}/{}/{}", self.name, self.version, self.user, self.channel)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root_key())
    }
}

/// A lowercase-hex hash string, used to address a specific binary package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageHash(String);

impl PackageHash {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(CoreError::bad_request(format!("malformed package hash: {raw}")));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `<coord>/<rev>/export/<filename>`.
pub fn recipe_key(coord: &Coordinate, rev: u64, filename: &str) -> String {
    format!("{}/{rev}/export/{filename}", coord.root_key())
}

/// `<coord>/<recipeRev>/package/<hash>/<binRev>/<filename>`.
pub fn binary_key(coord: &Coordinate, recipe_rev: u64, hash: &PackageHash, bin_rev: u64, filename: &str) -> String {
    format!("{}/{recipe_rev}/package/{hash}/{bin_rev}/{filename}", coord.root_key())
}

/// `<coord>/<recipeRev>/package/<hash>/` — the root of a binary's revisions.
pub fn binary_root(coord: &Coordinate, recipe_rev: u64, hash: &PackageHash) -> String {
    format!("{}/{recipe_rev}/package/{hash}", coord.root_key())
}

/// `<coord>/<rev>/export/` — the root of a recipe revision's files.
pub fn recipe_export_root(coord: &Coordinate, rev: u64) -> String {
    format!("{}/{rev}/export", coord.root_key())
}

/// Validate a raw key/path segment: rejects `..`, backslashes, and empty
/// segments. Mirrors the traversal checks used elsewhere in this workspace
/// for filesystem paths, generalized to virtual blob-store keys.
pub fn validate_key_segment(raw: &str) -> Result<()> {
    if raw.is_empty() || raw.contains("..") || raw.contains('\\') || raw.split('/').any(|s| s.is_empty()) {
        return Err(CoreError::bad_request(format!("invalid storage key: {raw}")));
    }
    Ok(())
}
