pub mod audio;
pub mod known_devices;
pub mod models;
pub mod power;
pub mod settings;
