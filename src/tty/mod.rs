//! Serial line I/O: the AT response reader and the raw-mode writer/setup.

pub mod reader;
pub mod writer;

pub use reader::{Terminator, TtyReadBuffer, TtyReadError};
pub use writer::{configure_serial, write_command};
