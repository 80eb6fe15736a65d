pub mod append;
pub mod appender;
pub mod digest;
pub mod error;
pub mod image;
pub mod layer;
pub mod notifier;
pub mod publisher;
pub mod reference;
pub mod registry;

// Re-exports for easy access
pub use append::{append_layer, AppendedImage};
pub use appender::{AppendOutcome, ImageAppender};
pub use error::AppendError;
pub use image::{Descriptor, HistoryEntry, ImageConfig, Manifest, ManifestSchema};
pub use layer::{build_single_file_layer, Layer};
pub use notifier::Notifier;
pub use publisher::publish;
pub use reference::ImageReference;
pub use registry::{DistributionClient, MemoryRegistry, RegistryAuth, RegistryClient};
