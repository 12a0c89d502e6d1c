use serde::{Deserialize, Serialize};

/// Identity bound to a request once its token verifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    pub tenant_id: String,
}
