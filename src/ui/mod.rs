pub mod icons;
pub mod progress;

pub use progress::{RunUI, print_summary};
