//! Binary wire framing and the message shapes built on top of it.

pub mod framing;
pub mod protocol;

pub use framing::{ReadBuffer, WriteBuffer};
