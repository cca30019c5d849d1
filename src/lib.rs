// Entity kinds, keys and event records
pub mod entity;

// Raw ↔ canonical fleet format conversion
pub mod normalize;

// Capture store, session controller and file model
pub mod capture;

// Replay scheduler and sinks
pub mod replay;

// Middleware source bindings
pub mod sources;

// Configuration
pub mod config;
