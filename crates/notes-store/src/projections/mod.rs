pub mod tag;
pub mod tree;

pub use tag::TagProjection;
pub use tree::{TreeProjection, TreeRow};
