//! A minimal Git client that speaks the Smart-HTTP protocol (version 2)
//! against remote repositories over http/https, with no local on-disk
//! repository and no shelling out to a `git` binary.
//!
//! The crate is organised around three pieces: the [`transport`] layer that
//! issues the three smart-http endpoints, the [`pack`]/[`pktline`] codecs
//! that move objects over the wire, and the [`stage`] writer that builds
//! trees and commits entirely in memory and pushes them as a single pack.

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate log;

#[macro_use]
mod macros;

#[cfg(test)]
#[macro_use]
pub mod test_utils;

pub mod client;
pub mod delta;
pub mod diff;
pub mod error;
pub mod hash;
pub mod obj;
pub mod pack;
pub mod pktline;
pub mod protocol;
pub mod refs;
pub mod signature;
pub mod stage;
pub mod store;
pub mod transport;

mod io;
mod serialize;

pub use client::{ClientOptions, GitClient};
pub use error::{GitError, GitResult};
pub use hash::{Oid, Sha1Hash};
