#![allow(dead_code)]

pub mod config;
pub mod jwt;
pub mod mock_upstream;
pub mod server;
pub mod sse;
