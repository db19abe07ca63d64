//! Bluetooth Module
//!
//! Provides BLE communication with LED strip controllers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Coordinator task - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - Filter  │  │ - Links    │  │ - UUIDs  │
//! │ - Results │  │ - GATT     │  │ - Frame  │
//! │ - Timeout │  │   binding  │  │   codec  │
//! └───────────┘  └────────────┘  └──────────┘
//!                       │
//!                       ▼
//!              ┌─────────────────┐
//!              │  Radio (trait)  │
//!              │  WinRT / Sim    │
//!              └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Service/characteristic UUIDs, name allow-list and color frames
//! - [`scanner`] - Scan filter, result list and scan window bookkeeping
//! - [`connection`] - Per-address link table and command characteristic selection
//! - [`radio`] - Link-layer trait and the events it reports
//! - [`sim`] - In-process radio for tests and demos
//! - [`service`] - Main service coordinator

pub mod connection;
pub mod protocol;
pub mod radio;
pub mod scanner;
pub mod service;
pub mod sim;
#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use service::BluetoothService;
