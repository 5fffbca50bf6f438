pub mod bar;
pub mod decision;
pub mod market;
pub mod portfolio;

pub use bar::*;
pub use decision::*;
pub use market::*;
pub use portfolio::*;
