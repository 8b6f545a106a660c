mod app;
mod state;

pub use app::create_app;
pub use state::{AppState, Services};
