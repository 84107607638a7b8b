pub mod store_errors;
