#![doc = include_str!("../README.md")]

mod config;
mod error;
mod job;
mod pool;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::job::*;
pub use crate::pool::*;
