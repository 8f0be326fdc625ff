pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod session;
pub mod shortcuts;
pub mod state;
pub mod stream;

// Re-export main types for convenience
pub use api::{HealthResponse, RagClient, ResetResponse, StatusResponse, UploadResponse};
pub use cache::{FileStorage, MemoryStorage, MessageCache, Storage};
pub use config::Config;
pub use error::{ApiError, PersistenceError};
pub use session::{drive_stream, AbortHandle, ChatSession, SendTicket, SessionEvent, StreamUpdate};
pub use shortcuts::{KeyChord, Platform, Shortcut};
pub use state::{ChatMessage, ChatRole, ChatState, ConnectionStatus, SourceInfo};
pub use stream::{EnvelopeDecoder, LineMode, StreamEnvelope};
