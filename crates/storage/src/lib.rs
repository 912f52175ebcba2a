pub mod directory;
pub mod fallback;
pub mod session;

pub use directory::{DirectoryError, RecordDirectory};
pub use session::{InsertStatus, LookupError, LookupHit, LookupSource, SessionRecord, SessionStore};
