pub mod archive;
pub mod commands;
pub mod config;
pub mod doctor;
pub mod empty;
pub mod error;
pub mod fs_utils;
pub mod import;
pub mod manager;
pub mod paths;
pub mod pointer;
pub mod profiles;
pub mod shared;
pub mod switch;
pub mod template;
pub mod ui;

pub use error::{Error, Result};

#[cfg(test)]
pub mod test_utils;
