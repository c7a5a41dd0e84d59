pub mod admin;
pub mod autopunch;
pub mod calibration;
pub mod devices;
pub mod health;
pub mod punch;
pub mod sync;
