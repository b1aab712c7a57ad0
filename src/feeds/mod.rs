pub mod chain_events;
