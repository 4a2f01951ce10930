pub mod metadata;
pub mod mover;
pub mod naming;

pub use mover::{FileMover, FsMover, MoveError};
