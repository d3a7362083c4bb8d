pub mod engine;
pub mod explorer;
pub mod session;
pub mod side_channel;

#[cfg(test)]
pub mod testing;
