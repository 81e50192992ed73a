pub mod forwarded;
pub mod trace;

pub use forwarded::PeerAddr;
