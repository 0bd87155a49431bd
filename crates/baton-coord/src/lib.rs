//! Baton Coordination Client
//!
//! The seam between the election and a hierarchical, watch-capable
//! coordination service:
//!
//! - **[`Connector`] / [`CoordinationClient`]**: session establishment and the
//!   node primitives the election depends on
//! - **[`WatchedEvent`]**: the single ordered notification stream per session
//! - **[`MemoryCoordinator`]**: an in-process service with ephemeral and
//!   sequential nodes and one-shot watches
//!
//! # Example
//!
//! ```no_run
//! use baton_coord::{event_channel, Acl, Connector, CreateMode, MemoryCoordinator};
//! use std::time::Duration;
//!
//! async fn example() {
//!     let service = MemoryCoordinator::new();
//!     let (events, mut stream) = event_channel();
//!     let client = service
//!         .connect("localhost:2181", Duration::from_secs(3), events)
//!         .await
//!         .unwrap();
//!
//!     client.create("/election", b"", Acl::OpenUnsafe, CreateMode::Persistent).await.unwrap();
//!     let watched = client.exists_watch("/election").await.unwrap();
//!     assert!(watched.is_some());
//!
//!     while let Some(event) = stream.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

mod client;
mod error;
mod event;
mod memory;

pub use client::{
    join_path, node_name, parent_path, validate_path, Acl, Connector, CoordinationClient,
    CreateMode, SessionId, Stat,
};
pub use error::{CoordinationError, Result};
pub use event::{event_channel, EventSink, EventStream, EventType, KeeperState, WatchedEvent};
pub use memory::{MemoryClient, MemoryCoordinator};
