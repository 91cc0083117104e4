pub mod token;
pub mod token_source;
pub mod token_store;
