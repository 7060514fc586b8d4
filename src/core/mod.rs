pub mod alert;
pub mod error;
pub mod event;
pub mod hash;
pub mod monitor;
pub mod time;
