pub mod app;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod listing;
pub mod output;
pub mod parser;
pub mod portal;
pub mod progress;
pub mod query;
pub mod store;
pub mod terminal;
