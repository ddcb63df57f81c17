//! Gateway server implementation

pub mod proxy;
pub mod response;
mod router;
mod server;

pub use router::{GatewayServices, create_router};
pub use server::Gateway;
