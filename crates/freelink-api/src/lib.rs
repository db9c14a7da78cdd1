// freelink-api: Async Rust client for the Freebox OS API (login, home, lan, system)

pub mod client;
pub mod error;
pub mod models;
pub mod session;
pub mod transport;

mod home;
mod lan;
mod system;

pub use client::FreeboxClient;
pub use error::Error;
pub use session::{
    AppCredential, AppDescriptor, AuthorizationStatus, SessionManager, SessionToken,
};
pub use transport::{TlsMode, TransportConfig};
