use serde::{Deserialize, Serialize};

/// Row totals for one store, used for the end-of-cycle log line and `--stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub threads: i64,
    pub posts: i64,
}
