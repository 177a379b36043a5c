//! Document state management and coordinate mapping.
//!
//! This module provides:
//! - `LineIndex` and `TextDocument` for byte offset <-> LSP position conversion
//! - `Region` and `Segment` describing how host bytes map to embedded bytes
//! - `LanguageModule` for splitting a host into embedded documents
//! - `DocumentStore` holding versioned documents and their mapping tables
//! - `EmbeddedTarget` for translating coordinates along a chain of embeddings

mod language;
mod map;
mod region;
mod state;
mod text;

/// Half-open byte range within one document.
pub type Span = std::ops::Range<usize>;

pub use language::{ComponentLanguage, EmbeddedCode, EmbeddedName, LanguageModule};
pub use map::{all_targets, embedded_targets, EmbeddedTarget};
pub use region::{Region, RegionKind, Segment};
pub use state::{DocumentNode, DocumentStore, SourceLink, MAX_EMBEDDING_DEPTH};
pub use text::{LineIndex, TextDocument};
