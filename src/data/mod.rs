pub mod block;
pub mod entry;
