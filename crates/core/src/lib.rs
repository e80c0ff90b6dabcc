//! `conan-core` — the repository data model and request/indexing engine for
//! the Conan package repository protocol: storage layout, INI parsing, the
//! advisory storage lock, the revision indexer, and the revisions API. The
//! URL registry and HTTP handlers live in `conan-http`; the binary entry
//! point and its auth gate wiring live in `conan-server`.

pub mod auth;
pub mod blob;
pub mod error;
pub mod ini;
pub mod index;
pub mod lock;
pub mod path;

pub use auth::{Action, AuthGate, Decision};
pub use blob::BlobStore;
pub use error::{CoreError, ErrorKind, Result};
pub use ini::IniDocument;
pub use index::{build_index, RevisionEntry, RevisionIndex, RevisionsApi};
pub use path::{Coordinate, PackageHash, PKG_BIN_LIST, PKG_SRC_LIST};
