//! WinRT Bluetooth LE backend
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      WinRtAdapter                        │
//! │       (implements BleAdapter for the discovery engine)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┬─────────────┐
//!         ▼             ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │  Radio   │  │ Protocol │
//! │ - adverts │  │ - GATT     │  │ - power  │  │ - GUIDs  │
//! │ - dedup   │  │ - CCCD     │  │   state  │  │ - buffers│
//! └───────────┘  └────────────┘  └──────────┘  └──────────┘
//! ```
//!
//! All WinRT callbacks run on OS threads and only push into unbounded
//! channels; nothing here blocks the runtime.

pub mod adapter;
pub mod connection;
pub mod protocol;
pub mod radio;
pub mod scanner;

pub use adapter::WinRtAdapter;
