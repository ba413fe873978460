mod fs_tree;
mod user_index;

pub use fs_tree::*;
pub use user_index::*;
