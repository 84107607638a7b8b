pub mod atomic;
pub mod dynamo_store;
pub mod errors;
pub mod memory_store;
pub mod paths;
pub mod store;
