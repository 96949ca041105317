//! Local transaction branch

use crate::lock::TxnId;

/// Separator between node name and transaction id in a branch name
pub(crate) const NAME_SEPARATOR: char = ':';

/// A local transaction branch on one storage node
///
/// A branch is live while its manager tracks it; commit and rollback remove it.
#[derive(Debug, Clone)]
pub struct LocalTransaction {
    /// Unique transaction ID on this node (monotonically increasing)
    pub txn_id: TxnId,

    /// Globally unique branch name, `<node>:<txn_id>`
    pub name: String,
}

impl LocalTransaction {
    pub fn new(txn_id: TxnId, node_name: &str) -> Self {
        Self {
            txn_id,
            name: branch_name(node_name, txn_id),
        }
    }
}

pub(crate) fn branch_name(node_name: &str, txn_id: TxnId) -> String {
    format!("{}{}{}", node_name, NAME_SEPARATOR, txn_id)
}

/// Split a branch name into node name and transaction id
pub fn parse_branch_name(name: &str) -> Option<(&str, TxnId)> {
    let (node, id) = name.rsplit_once(NAME_SEPARATOR)?;
    Some((node, id.parse().ok()?))
}
