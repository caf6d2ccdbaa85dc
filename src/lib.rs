/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! PrismaFS: a lightweight, layered ("union") filesystem inspired by
//! Plan 9 namespace composition.
//!
//! This crate is the overlay resolution and write-capture engine: the
//! part of PrismaFS that maps a virtual path to a backing entry across
//! N+1 layers, enforces write-on-modify semantics via copy-up, merges
//! unioned directory listings, and implements deletion-by-whiteout. The
//! kernel-to-userspace protocol bridge lives in `src/bin/prismafs.rs` and
//! talks to [`dispatcher::Dispatcher`] exclusively through `VirtualPath`s.

pub mod config;
pub mod copyup;
pub mod dispatcher;
pub mod error;
pub mod layer;
pub mod merge;
pub mod virt;
pub mod vpath;
pub mod whiteout;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::Error;
pub use error::Result;
pub use vpath::VirtualPath;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
