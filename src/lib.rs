pub mod app;
pub mod classify;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod prefecture;
pub mod watcher;
pub mod webdriver;
