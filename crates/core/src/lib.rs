pub mod channel;
pub mod events;
pub mod models;
pub mod traits;

pub use channel::*;
pub use events::*;
pub use models::*;
pub use traits::*;
