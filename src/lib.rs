pub mod classifier;
pub mod constants;
pub mod continuation;
pub mod engine;
pub mod handler;
pub mod health;
pub mod ingress;
pub mod injector;
pub mod logging;
pub mod main_helper;
pub mod processor;
pub mod redaction_layer;
pub mod specs;
pub mod str_utils;
pub mod streaming;
pub mod types;
pub mod upstream;
pub mod writer;

pub use types::*;

pub use main_helper::{AppState, Args, ProxyConfig};
