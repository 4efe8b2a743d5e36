//! Backend repositories and the write-behind decorator over them.

pub mod cached;
pub mod file;
pub mod sqlite;
