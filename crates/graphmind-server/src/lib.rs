//! graphmind-server: configuration, logging and lifecycle orchestration.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              graphmind-server                │
//! ├─────────────────────────────────────────────┤
//! │  config.rs      - Layered configuration     │
//! │  context.rs     - AppContext lifecycle      │
//! │  observability/ - Structured logging        │
//! │  main.rs        - graphmind binary          │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod observability;

pub use config::{ConfigLoadError, ServerConfig};
pub use context::AppContext;
