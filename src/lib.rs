pub mod compression;
pub mod encoding;
pub mod encryption;
pub mod error;
pub mod memory;
pub mod proto;
pub mod reader;
pub mod schema;
pub mod sink;
pub mod statistics;
pub mod stripe;
pub mod writer;
