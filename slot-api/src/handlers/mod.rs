mod app;
mod slot;

pub use app::app;
