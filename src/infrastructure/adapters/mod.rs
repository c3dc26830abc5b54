//! Infrastructure Adapters
//!
//! 六边形架构的适配器实现

pub mod preferences;
pub mod sd;
pub mod tg;

pub use preferences::*;
pub use sd::*;
pub use tg::*;
