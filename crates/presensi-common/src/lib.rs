//! Common types shared across Presensi services

pub mod config;
pub mod error;

pub use error::{ErrorClass, PresensiError, Result};
