mod file_log;
mod in_memory;
mod log;
mod op_id;

pub use file_log::FileLog;
pub use in_memory::InMemoryLog;
pub use log::Log;
pub use log::LogEntry;
pub use log::LogError;
pub use log::ReplicatedOperation;
pub use op_id::OpId;
pub use op_id::Term;
