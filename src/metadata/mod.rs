//! Metadata exchange module
//!
//! Collects the info dictionary from peers, verifies it against the info
//! hash and persists it.

pub mod assembly;
pub mod collector;
pub mod gate;
pub mod store;
pub mod verify;

pub use assembly::{MetadataAssembly, PieceOutcome};
pub use collector::{collect_metadata, CollectedMetadata, MetadataSource, MAX_METADATA_SIZE};
pub use gate::MetadataGate;
pub use store::{MetadataStore, METADATA_FILE_NAME};
pub use verify::verify_metadata;
