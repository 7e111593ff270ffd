pub mod gateway;
pub mod terminal;
pub mod types;

pub use gateway::*;
pub use terminal::TerminalPrompt;
pub use types::*;
