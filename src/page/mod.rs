pub mod reducer;
pub mod traits;
pub mod types;
