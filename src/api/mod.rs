//! API module - public interfaces

pub mod index;
pub mod search;

pub use index::{build_index, IndexConfig, IndexParams, IndexType};
pub use search::{BinarySearchResult, RangeSearchResult, SearchResult};
