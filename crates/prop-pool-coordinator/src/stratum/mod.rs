pub mod connection;
pub mod protocol;
pub mod server;

pub use connection::{ConnectionHandler, MinerConnection};
pub use protocol::{StratumError, StratumMessage, StratumRequest, StratumResponse, SubmitParams};
pub use server::{ConnectionRegistry, StratumServer};
