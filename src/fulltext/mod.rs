//! Search-engine backed schema indexes.
//!
//! **Tantivy**: each partition is a tantivy index directory. Equality runs
//! on an indexed coarse-key term; other queries scan stored values.
//!
//! # Examples
//! ```toml
//! sekejap-index = { features = ["fulltext"] }
//! ```

#[cfg(feature = "fulltext-tantivy")]
mod tantivy;
#[cfg(feature = "fulltext-tantivy")]
pub use self::tantivy::{TantivyBackend, TantivyIndexProvider, TantivyPartition, TantivySearcher};
