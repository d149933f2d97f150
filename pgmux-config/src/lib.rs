// Submodules
pub mod core;
pub mod error;
pub mod general;
pub mod networking;
pub mod upstream;
pub mod users;
pub mod util;

pub use core::{Config, ConfigAndUsers};
pub use error::Error;
pub use general::{General, LogFormat};
pub use networking::Tcp;
pub use upstream::Upstream;
pub use users::{User, Users};
