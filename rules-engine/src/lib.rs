#![allow(clippy::missing_docs_in_private_items)]
pub mod context;
pub mod dsl;
pub mod index;
pub mod resolver;

pub use context::{column_index_map, extract_tag_context, pad_account_id, MappedResource};
pub use dsl::DslError;
pub use index::{build_indexes, CompiledDimension};
pub use resolver::{map_resource, resolve};
