pub mod archive;
pub mod disk_store;
pub mod ingestor;
pub mod store;
pub mod zip_stream;
