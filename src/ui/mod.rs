pub mod icons;
pub mod output;
pub mod progress;
pub mod progress_message;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{diagnostic, dim, error, header, location, muted, status, success, symbol_kind, warn};
pub use progress::ProgressManager;
pub use progress_message::{ProgressMessage, ProgressPhase};
pub use table::{TableBuilder, stats_table, usages_table};
pub use theme::{Role, Theme, theme};
