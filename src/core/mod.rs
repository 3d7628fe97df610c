pub mod config;
pub mod error;
pub mod release;
pub mod retry;
pub mod status;
pub mod traits;

pub use config::*;
pub use error::*;
pub use release::*;
pub use retry::*;
pub use status::*;
pub use traits::*;
