pub mod cache;
pub mod file_store;
