pub mod controller;
pub mod state;

pub use controller::CoverController;
pub use state::CoverState;
