pub mod layout;
pub mod vec1;
pub mod writer;

pub use layout::{default_index_dir, IndexPaths};
pub use writer::{IndexWriter, WrittenIndex};
