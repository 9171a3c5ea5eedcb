pub mod data;
pub mod io;

pub use data::{Config, ModelConfig};
pub use io::ConfigError;

#[cfg(test)]
mod tests;
