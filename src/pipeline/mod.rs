mod extract;
mod filter;
mod status;
mod translate;

pub use extract::{run_extract, ExtractOptions};
pub use filter::{run_filter, BlacklistConfig, FilterOptions};
pub use status::run_status;
pub use translate::{run_translate, TranslateOptions};
