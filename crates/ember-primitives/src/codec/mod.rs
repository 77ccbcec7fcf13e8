mod hash;
mod rw;

pub use hash::{hash256, merkle_root};
pub use rw::{ByteReader, ByteWriter, CodecError};
