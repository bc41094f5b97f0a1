mod handlers;
mod models;
mod state;
mod translate;
mod util;
mod viewer;

pub use handlers::run_server;
