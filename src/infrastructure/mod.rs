pub mod logging;

#[cfg(windows)]
pub mod bluetooth;
