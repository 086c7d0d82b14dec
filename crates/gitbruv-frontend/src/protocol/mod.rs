pub mod capabilities;
pub mod negotiation;
#[allow(clippy::result_large_err)]
pub mod pktline;
pub mod sideband;

pub use capabilities::{Capabilities, ReceivePackCapabilities, UploadPackCapabilities};
pub use negotiation::{negotiate, NegotiationLine, NegotiationRequest, NegotiationResponse};
pub use pktline::{PktLine, PktLineReader, PktLineWriter, FLUSH_PKT};
pub use sideband::{Band, SidebandMode};
