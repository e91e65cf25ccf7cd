use std::collections::BTreeMap;

use crate::collections::{Collection, InterestSet};
use crate::commit::{AtUri, Commit, OpAction};
use crate::records::Record;

/// A create operation whose block resolved to a typed record of interest.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRecord {
    pub record: Record,
    pub uri: AtUri,
    pub cid: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedRecord {
    pub uri: AtUri,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionOps {
    pub created: Vec<CreatedRecord>,
    pub deleted: Vec<DeletedRecord>,
}

pub type OperationsByType = BTreeMap<Collection, CollectionOps>;

/// Extracts the operations of interest from one commit.
///
/// Updates, unresolvable blocks, undecodable records and collections outside
/// `interest` are skipped without error. Output order within each list follows
/// commit order.
pub fn decode_commit(commit: &Commit, interest: &InterestSet) -> OperationsByType {
    let mut by_type = OperationsByType::new();

    for op in &commit.ops {
        let uri = AtUri::from_op(&commit.repo, &op.path);
        let Some(collection) = interest.classify(&uri.collection) else {
            continue;
        };

        match op.action {
            OpAction::Create => {
                let Some(cid) = op.cid.as_deref().filter(|cid| !cid.is_empty()) else {
                    continue;
                };
                let Some(bytes) = commit.blocks.resolve(cid) else {
                    tracing::trace!(seq = commit.seq, %uri, cid, "block missing from commit");
                    continue;
                };
                let Some(record) = Record::decode(collection, bytes) else {
                    tracing::trace!(seq = commit.seq, %uri, cid, "record did not decode");
                    continue;
                };
                by_type
                    .entry(collection)
                    .or_default()
                    .created
                    .push(CreatedRecord {
                        record,
                        uri,
                        cid: cid.to_string(),
                        author: commit.repo.clone(),
                    });
            }
            OpAction::Delete => {
                by_type
                    .entry(collection)
                    .or_default()
                    .deleted
                    .push(DeletedRecord { uri });
            }
            OpAction::Update | OpAction::Other(_) => {}
        }
    }

    by_type
}
