mod multiplexer;
mod record;
mod transport;
mod visibility;

pub use multiplexer::{StatusStreams, Subscription};
pub use record::{ConnState, StreamRecord};
pub use transport::{FrameStream, HttpTransport, StreamTransport, TransportKind};
pub use visibility::Visibility;
