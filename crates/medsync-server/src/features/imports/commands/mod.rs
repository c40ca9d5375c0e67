pub mod sync;
pub mod upload;

pub use sync::{SyncImportCommand, SyncImportError};
pub use upload::{UploadImportCommand, UploadImportError};
