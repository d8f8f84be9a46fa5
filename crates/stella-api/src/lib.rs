pub mod error;
pub mod events;
pub mod friendships;
pub mod posts;
pub mod progress;
pub mod routes;
pub mod state;
pub mod users;
pub mod votes;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, AppStateInner};
