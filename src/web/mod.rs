//! External web interface (C16): the only layer of this binary that
//! speaks HTTP. Reviewed at the boundary only — every route delegates
//! into `polly-core`'s services, never reimplementing their logic.

pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
