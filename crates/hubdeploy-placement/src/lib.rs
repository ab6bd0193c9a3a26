//! hubdeploy-placement — capacity decisions for deploy requests.
//!
//! Pure functions only; nothing here performs I/O. The deployer feeds in
//! node snapshots from the image runner and reservations from the store.
//!
//! # Components
//!
//! - **`quantity`**: CPU and memory quantity parsing
//! - **`matcher`**: single- and multi-node hardware fit
//! - **`aggregate`**: reservation subtraction and cluster roll-ups

pub mod aggregate;
pub mod error;
pub mod matcher;
pub mod quantity;

pub use aggregate::{apply_reservations, rollup, usage_ratio, usage_summary};
pub use error::{PlacementError, PlacementResult};
pub use matcher::{ResourceRequest, check_multi_node, check_resource, check_single_node, fits};
pub use quantity::{parse_cpu_cores, parse_memory_gib};
