pub mod chat_lock;
pub mod generate;
pub mod interrupt;
