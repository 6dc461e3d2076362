pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod extraction;
pub mod format;
pub mod levels;
pub mod pipeline;
pub mod plan;
pub mod resolver;
pub mod store;
pub mod tools;
pub mod validation;
