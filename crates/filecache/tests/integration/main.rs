// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod concurrency;
pub mod files;
pub mod utils;

pub use utils::*;
