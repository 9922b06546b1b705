//! Migration Coordinator API
//!
//! HTTP surface of a coordinator process.
//!
//! ## Endpoints
//!
//! ### Health
//! - GET /health - Liveness and token store reachability
//! - GET /ready - 503 while the token store is unreachable
//!
//! ### Tokens
//! - GET /api/v1/tokens/:mint - Read-only migration record snapshot
//! - GET /api/v1/tokens/:mint/events - Websocket stream of migration events
//!
//! ### Administrative trigger (bearer JWT with `operator` or `admin` role)
//! - POST /api/v1/migration - `{mint, step: "resume" | "finalize" | "withdraw" | "harvest"}`

pub mod auth;
pub mod dto;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::{AuthClaims, JwtConfig};
pub use dto::*;
pub use error::*;
pub use routes::create_router;
pub use server::*;
pub use state::*;
