pub mod command;
pub mod common;
pub mod split;
pub mod split_paired;
