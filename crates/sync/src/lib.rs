//! # skiff-sync
//!
//! Mirrors one repository of a remote container registry into the content
//! store and finalizes a new repository version.
//!
//! A sync runs as three passes over the same staged pipeline, one per tier of
//! the content graph, then writes every parent→child association once all
//! content is saved. Saves of the same natural key are collapsed into one
//! write no matter how many units race for it, and every queue between stages
//! is bounded.
//!
//! ```no_run
//! # async fn example(
//! #     config: skiff_config::Config,
//! #     store: skiff_content::StoreHandle,
//! #     storage: skiff_storage::BackendHandle,
//! # ) -> skiff_sync::error::Result<()> {
//! use skiff_sync::{Task, synchronize};
//! use tokio_util::sync::CancellationToken;
//!
//! let task = Task::new(&config, "hub", "alpine")?;
//! let report = synchronize(&task, store, storage, &CancellationToken::new()).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

mod context;
pub mod error;
mod pipeline;
mod report;
mod retry;
mod stages;
mod task;
mod unit;

pub use crate::pipeline::in_flight_bound;
pub use crate::report::{KindCounts, Rejection, SyncReport};
pub use crate::task::{Task, synchronize, synchronize_with};
