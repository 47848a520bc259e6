//! I/O adapters: device transport, files, and external tools.

pub mod adb;
pub mod config;
pub mod device;
pub mod games;
pub mod ocr;
pub mod process;
pub mod templates;
