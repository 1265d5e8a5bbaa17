pub mod candle;
pub mod frame;
pub mod interval;
pub mod signal;

pub use candle::*;
pub use frame::*;
pub use interval::*;
pub use signal::*;
