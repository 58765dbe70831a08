pub mod file_format;
pub mod log_setup;
pub mod serde;
pub mod slot;

pub use file_format::FileFormat;
pub use slot::{Recv, Sent, Slot};
