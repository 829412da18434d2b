//! Integration suite: the full hedged-order lifecycle against an
//! in-memory broker and store.

mod lifecycle;
mod memory_store;
mod mock_broker;
