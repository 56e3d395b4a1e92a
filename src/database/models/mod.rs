pub mod lesson;
pub mod progress;
pub mod receipt;
pub mod user;

pub use lesson::*;
pub use progress::*;
pub use receipt::*;
pub use user::*;
