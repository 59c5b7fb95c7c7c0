pub mod archive;
pub mod config;
pub mod git;
pub mod http;
pub mod package;
pub mod source;
pub mod store;
pub mod sync;

#[cfg(test)]
pub mod test_utils;
