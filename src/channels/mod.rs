//! Chat Platform Transport
//!
//! - `traits`: the `Transport` contract and message types the bridge works with
//! - `discord`: Discord REST implementation of `Transport`
//! - `gateway`: Discord websocket gateway producing `InboundMessage`s
//! - `directory`: cached thread → parent channel lookups for the access filter

pub mod directory;
pub mod discord;
pub mod gateway;
pub mod traits;

pub use directory::ChannelDirectory;
pub use discord::{DiscordConfig, DiscordTransport};
pub use gateway::{Gateway, GatewayConfig};
pub use traits::{
    ChannelInfo, ChannelKind, InboundMessage, Requester, Transport, TransportError,
};
