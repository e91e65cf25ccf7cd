use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One commit notification from the event source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Commit {
    pub seq: u64,
    pub repo: String,
    pub blocks: BlockSet,
    pub ops: Vec<RepoOp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoOp {
    pub action: OpAction,
    pub path: String,
    pub cid: Option<String>,
}

impl RepoOp {
    pub fn create(path: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            action: OpAction::Create,
            path: path.into(),
            cid: Some(cid.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            action: OpAction::Delete,
            path: path.into(),
            cid: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpAction {
    Create,
    Update,
    Delete,
    Other(String),
}

impl OpAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other(value) => value,
        }
    }
}

impl From<&str> for OpAction {
    fn from(value: &str) -> Self {
        match value {
            "create" => Self::Create,
            "update" => Self::Update,
            "delete" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Content-addressed blocks attached to a single commit, keyed by CID string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSet {
    blocks: HashMap<String, Vec<u8>>,
}

impl BlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cid: impl Into<String>, bytes: Vec<u8>) {
        self.blocks.insert(cid.into(), bytes);
    }

    pub fn resolve(&self, cid: &str) -> Option<&[u8]> {
        self.blocks.get(cid).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl FromIterator<(String, Vec<u8>)> for BlockSet {
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        Self {
            blocks: iter.into_iter().collect(),
        }
    }
}

/// `at://<repo>/<collection>/<rkey>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtUri {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    pub fn from_op(repo: &str, path: &str) -> Self {
        let (collection, rkey) = path.split_once('/').unwrap_or((path, ""));
        Self {
            repo: repo.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        }
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}", self.repo, self.collection)?;
        if !self.rkey.is_empty() {
            write!(f, "/{}", self.rkey)?;
        }
        Ok(())
    }
}

impl FromStr for AtUri {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let rest = value.strip_prefix("at://").ok_or("missing at:// scheme")?;
        let (repo, path) = rest.split_once('/').ok_or("missing collection")?;
        if repo.is_empty() {
            return Err("missing repo");
        }
        Ok(Self::from_op(repo, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_uri_splits_collection_and_record_key() {
        let uri = AtUri::from_op("did:plc:abc", "app.bsky.feed.post/3lc2looeiuc2n");
        assert_eq!(uri.collection, "app.bsky.feed.post");
        assert_eq!(uri.rkey, "3lc2looeiuc2n");
        assert_eq!(
            uri.to_string(),
            "at://did:plc:abc/app.bsky.feed.post/3lc2looeiuc2n"
        );
    }

    #[test]
    fn at_uri_parses_display_form() {
        let uri: AtUri = "at://did:plc:abc/app.bsky.feed.like/3k".parse().unwrap();
        assert_eq!(uri.repo, "did:plc:abc");
        assert_eq!(uri.collection, "app.bsky.feed.like");
        assert_eq!(uri.rkey, "3k");
        assert!("https://example.com".parse::<AtUri>().is_err());
    }

    #[test]
    fn unknown_actions_are_preserved() {
        assert_eq!(OpAction::from("create"), OpAction::Create);
        assert_eq!(OpAction::from("patch"), OpAction::Other("patch".into()));
        assert_eq!(OpAction::from("patch").as_str(), "patch");
    }
}
