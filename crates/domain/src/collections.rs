use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Record collections the pipeline knows how to decode and materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Post,
    Like,
    Repost,
    Follow,
}

impl Collection {
    pub const ALL: [Collection; 4] = [Self::Post, Self::Like, Self::Repost, Self::Follow];

    pub fn nsid(&self) -> &'static str {
        match self {
            Self::Post => "app.bsky.feed.post",
            Self::Like => "app.bsky.feed.like",
            Self::Repost => "app.bsky.feed.repost",
            Self::Follow => "app.bsky.graph.follow",
        }
    }

    /// Expected `$type` of a block decoded for this collection.
    pub fn record_type(&self) -> &'static str {
        self.nsid()
    }

    pub fn from_nsid(nsid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|collection| collection.nsid() == nsid)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nsid())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_nsid(value.trim()).ok_or_else(|| format!("unknown collection '{value}'"))
    }
}

/// Read-only set of collections to extract from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterestSet {
    collections: BTreeSet<Collection>,
}

impl InterestSet {
    pub fn new(collections: impl IntoIterator<Item = Collection>) -> Self {
        Self {
            collections: collections.into_iter().collect(),
        }
    }

    pub fn posts_only() -> Self {
        Self::new([Collection::Post])
    }

    /// Parses a comma separated list of NSIDs.
    pub fn parse_list(value: &str) -> Result<Self, String> {
        let collections = value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(Collection::from_str)
            .collect::<Result<BTreeSet<_>, _>>()?;
        if collections.is_empty() {
            return Err("interest set must name at least one collection".to_string());
        }
        Ok(Self { collections })
    }

    /// Returns the collection for `nsid` only if it is of interest.
    pub fn classify(&self, nsid: &str) -> Option<Collection> {
        Collection::from_nsid(nsid).filter(|collection| self.collections.contains(collection))
    }

    pub fn contains(&self, collection: Collection) -> bool {
        self.collections.contains(&collection)
    }

    pub fn iter(&self) -> impl Iterator<Item = Collection> + '_ {
        self.collections.iter().copied()
    }
}

impl Default for InterestSet {
    fn default() -> Self {
        Self::posts_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_ignores_collections_outside_the_set() {
        let interest = InterestSet::posts_only();
        assert_eq!(interest.classify("app.bsky.feed.post"), Some(Collection::Post));
        assert_eq!(interest.classify("app.bsky.feed.like"), None);
        assert_eq!(interest.classify("app.bsky.feed.generator"), None);
    }

    #[test]
    fn parse_list_accepts_known_nsids() {
        let interest =
            InterestSet::parse_list("app.bsky.feed.post, app.bsky.graph.follow").unwrap();
        assert!(interest.contains(Collection::Post));
        assert!(interest.contains(Collection::Follow));
        assert!(!interest.contains(Collection::Like));
    }

    #[test]
    fn reposts_are_classified_when_listed() {
        let interest = InterestSet::parse_list("app.bsky.feed.repost").unwrap();
        assert_eq!(interest.classify("app.bsky.feed.repost"), Some(Collection::Repost));
        assert_eq!(interest.classify("app.bsky.feed.post"), None);
    }

    #[test]
    fn parse_list_rejects_unknown_and_empty() {
        assert!(InterestSet::parse_list("app.bsky.feed.threadgate").is_err());
        assert!(InterestSet::parse_list(" , ").is_err());
    }
}
