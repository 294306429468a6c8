pub mod booking;
pub mod notification;

pub use booking::*;
pub use notification::*;
