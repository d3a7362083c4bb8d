pub mod adapter;
pub mod adapter_state;
pub mod assigned_numbers;
pub mod dedup;
pub mod filter;
pub mod models;
pub mod scan_records;
pub mod settings;
