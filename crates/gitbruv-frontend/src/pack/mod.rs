pub mod writer;

pub use writer::{write_pack, PackEntry, PackStats, PackWriter, StreamingPackWriter};
