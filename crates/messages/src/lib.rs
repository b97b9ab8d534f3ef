//! Persisted conversation messages and the reducer that builds one from a
//! live stream of generation events.

pub mod reducer;
pub mod store;

pub use reducer::{reduce_stream, MessageReducer, Outcome, ReducerState};
pub use store::MessageStore;
