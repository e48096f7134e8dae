pub mod config;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod source;
