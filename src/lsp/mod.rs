//! LSP protocol feature implementations.
//!
//! Each submodule adds the [`LanguageService`](crate::LanguageService)
//! methods for a group of LSP features:
//! - Hover and signature help
//! - Completion with tagged resolve
//! - Diagnostics from validation stages and rules
//! - Navigation, symbols, and call hierarchy
//! - Rename, formatting, code actions, and commands
//! - Folding, selection, colors, inlay hints, and code lenses
//! - Semantic tokens
//! - Auto-insert (a custom request)

mod auto_insert;
mod capabilities;
mod completion;
mod diagnostics;
mod document;
mod edits;
mod hover;
mod navigation;
mod semantic_tokens;

pub use auto_insert::{AutoInsertChange, AutoInsertContext, AutoInsertParams, AutoInsertResponse};
pub use capabilities::server_capabilities;
pub use semantic_tokens::{legend, token_modifiers, token_types, AbsoluteToken};
