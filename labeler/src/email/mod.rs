pub mod client;
pub mod label_mapper;
pub mod normalized_message;
pub mod provider;
