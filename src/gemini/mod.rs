pub mod models;
pub mod stream;
pub mod types;

pub use models::DEFAULT_MODEL;
pub use stream::{consume_stream, StreamSummary};
