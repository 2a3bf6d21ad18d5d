pub mod endpoint;
pub mod folder;
pub mod memory;

pub use endpoint::{process_batch, BatchReport, Endpoint, UploadError, Uploader, DEFAULT_UPLOAD_TIMEOUT};
pub use folder::{FolderEndpoint, FolderEndpointConfig, FolderLink};
pub use memory::{Behavior, InMemoryEndpoint};
