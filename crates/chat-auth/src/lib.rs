pub mod directory;
pub mod pg;
pub mod session;
pub mod tenant;

// 重新导出核心类型
pub use directory::{ConversationDirectory, MemoryDirectory, TenantDirectory};
pub use pg::PgDirectory;
pub use session::{MemorySessionStore, RedisSessionStore, SessionStore, SessionValidator};
pub use tenant::{TenantValidation, TenantValidator};

// 错误类型
pub use chat_error::{ChatError, Result};
