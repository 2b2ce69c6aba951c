//! arch-bootstrap library exports.
//!
//! The binary is a thin CLI over these modules; integration tests drive the
//! pipeline through fake [`process::CommandRunner`] and [`probe::HostProbe`]
//! implementations.

pub mod aur;
pub mod bootloader;
pub mod config;
pub mod configure;
pub mod crypt;
pub mod disk;
pub mod error;
pub mod journal;
pub mod logging;
pub mod packages;
pub mod pipeline;
pub mod preflight;
pub mod probe;
pub mod process;
pub mod storage;
pub mod sysinfo;
pub mod target;
pub mod timing;
