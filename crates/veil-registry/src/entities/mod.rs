//! Database entities

pub mod client;
pub mod server;

pub use client::Entity as Client;
pub use server::Entity as Server;

pub mod prelude {
    pub use super::client::Entity as Client;
    pub use super::server::Entity as Server;
}
