pub mod calc;
pub mod categories;
pub mod core;
pub mod courses;
pub mod export;
pub mod setup;
pub mod sync;
