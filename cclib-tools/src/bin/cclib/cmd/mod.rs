pub mod ble_info;
pub mod ble_write;
pub mod info;
pub mod read;
pub mod resume;
pub mod write;
