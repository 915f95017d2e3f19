mod devices;
mod output;

pub use devices::{list_devices, CpalInputs};
pub use output::{OutputDevice, SilentClock};
