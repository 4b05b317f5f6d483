pub mod acquisition;
pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod processing;
pub mod progress;
pub mod question;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod validate;

#[cfg(test)]
mod test_support;
