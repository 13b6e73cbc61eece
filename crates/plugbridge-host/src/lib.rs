//! Host-process side of the plugin bridge.
//!
//! Loads one VST3 module, adapts it behind a [`session::PluginSession`], and
//! serves the binary command protocol from `plugbridge` over a single TCP
//! connection. Audio is exchanged through the shared-memory channel the
//! controller creates; the editor, when open, is embedded in a native window
//! owned by this process.

// The VST3 interface traits use the SDK's camelCase method names.
#![allow(non_snake_case)]

pub mod edits;
pub mod events;
pub mod gui;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use server::HostServer;
pub use session::PluginSession;
