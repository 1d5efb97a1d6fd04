//! Wire types shared by the companion server and the controller client

mod power;
mod response;

pub use power::PowerAction;
pub use response::{routes, ApiResponse, FingerprintData};
