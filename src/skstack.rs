pub mod active_scan;
pub mod arg;
pub mod authn;
pub mod parser;
pub mod send_receive;
pub mod serial_io;
pub mod skrxd;

pub use active_scan::*;
pub use send_receive::*;
pub use serial_io::*;
pub use skrxd::*;

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o")]
    Io(#[from] io::Error),
}
