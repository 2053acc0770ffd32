pub mod app;
pub mod approval;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod deploy;
pub mod environment;
pub mod error;
pub mod invoker;
pub(crate) mod logging;
pub mod pipeline;
pub mod policy;

#[cfg(test)]
mod tests;
