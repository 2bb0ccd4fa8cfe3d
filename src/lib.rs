//! A session-oriented streaming gateway core for partitioned record logs.
//!
//! The gateway fronts two backing stores: an append-only, partitioned
//! records storage and a positions storage holding committed offsets per
//! consumer group. On top of them it implements a four-verb session
//! protocol, ready to be bound to any schema-typed RPC transport:
//!
//! - **Publish** an envelope through the pre-processor chain into the log.
//! - **Subscribe** to a topic as a consumer group: a session is minted and
//!   every partition assignment is streamed back.
//! - **Receive** the record stream of one assigned partition, resumed from
//!   the group's committed offset and stamped with a replay flag.
//! - **Ack** consumed offsets into the positions storage (plus a
//!   **GetOffsets** query for committed positions).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use streamgate::api::{AutoOffsetReset, PublishRequest, ReceiveRequest, SubscribeRequest};
//! use streamgate::storage::memory::{InMemoryPositionsStorage, InMemoryRecordsStorage};
//! use streamgate::GatewayBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = GatewayBuilder::new(
//!     Arc::new(InMemoryRecordsStorage::new(1)),
//!     Arc::new(InMemoryPositionsStorage::new()),
//! )
//! .build();
//!
//! gateway
//!     .publish(PublishRequest {
//!         topic: "orders".to_string(),
//!         key: "customer-1".into(),
//!         value: "created".into(),
//!     })
//!     .await?;
//!
//! let mut assignments = gateway.subscribe(SubscribeRequest {
//!     topic: "orders".to_string(),
//!     group: "billing".to_string(),
//!     group_version: 0,
//!     auto_offset_reset: AutoOffsetReset::Earliest,
//! });
//!
//! if let Some(reply) = assignments.next().await {
//!     let mut records = gateway.receive(ReceiveRequest {
//!         assignment: reply?.assignment,
//!         last_known_offset: 0,
//!     });
//!
//!     while let Some(record) = records.next().await {
//!         println!("{:?}", record?);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod gateway;
pub mod group;
pub mod processor;
pub mod record;
pub mod status;
pub mod storage;

pub use crate::gateway::{Gateway, GatewayBuilder};
pub use crate::status::{Code, Status};
