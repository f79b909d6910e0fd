pub mod constants;
pub mod filename;
pub mod logging;
pub mod progress;

pub use constants::*;
pub use filename::output_file_name;
pub use progress::ProgressReporter;
