//! Library crate for tls-checker-rs: finds outbound HTTP(S) hosts in PHP
//! source trees and records whether each one negotiates TLS 1.2 or newer.
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod lexer;
pub mod normalize;
pub mod probe;
pub mod scanner;
pub mod server;
pub mod store;
pub mod types;
