//! Typed views over decoded repository records.
//!
//! Blocks are DAG-CBOR. They are decoded once into an [`Ipld`] tree and then
//! read permissively: malformed or missing optional fields become `None` or
//! empty, while the closed set of embed kinds is matched explicitly with an
//! [`Embed::Unrecognized`] fallback.

use std::collections::BTreeMap;

use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};

use crate::collections::Collection;

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Post(PostRecord),
    Like(SubjectRecord),
    Repost(SubjectRecord),
    Follow(FollowRecord),
}

impl Record {
    /// Decodes a raw block for `collection`.
    ///
    /// Returns `None` when the bytes are not DAG-CBOR or the block's `$type`
    /// does not match the collection.
    pub fn decode(collection: Collection, bytes: &[u8]) -> Option<Self> {
        let ipld = match serde_ipld_dagcbor::from_slice::<Ipld>(bytes) {
            Ok(ipld) => ipld,
            Err(err) => {
                tracing::trace!(error = %err, %collection, "block is not dag-cbor");
                return None;
            }
        };
        Self::from_ipld(collection, &ipld)
    }

    pub fn from_ipld(collection: Collection, ipld: &Ipld) -> Option<Self> {
        let fields = Fields::of(ipld)?;
        if fields.str("$type") != Some(collection.record_type()) {
            return None;
        }
        Some(match collection {
            Collection::Post => Self::Post(PostRecord::from_fields(&fields)),
            Collection::Like => Self::Like(SubjectRecord::from_fields(&fields)?),
            Collection::Repost => Self::Repost(SubjectRecord::from_fields(&fields)?),
            Collection::Follow => Self::Follow(FollowRecord {
                subject: fields.string("subject")?,
                created_at: fields.string("createdAt"),
            }),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostRecord {
    pub text: String,
    pub created_at: Option<String>,
    pub langs: Vec<String>,
    pub labels: Vec<String>,
    pub reply: Option<ReplyRef>,
    pub embed: Option<Embed>,
    pub tags: Vec<String>,
}

impl PostRecord {
    fn from_fields(fields: &Fields<'_>) -> Self {
        let labels = fields
            .map("labels")
            .map(|labels| {
                labels
                    .list("values")
                    .filter_map(|value| Fields::of(value)?.string("val"))
                    .collect()
            })
            .unwrap_or_default();
        let reply = fields.map("reply").and_then(|reply| {
            Some(ReplyRef {
                parent: reply.map("parent").and_then(|f| StrongRef::from_fields(&f))?.cid,
                root: reply.map("root").and_then(|f| StrongRef::from_fields(&f))?.cid,
            })
        });

        Self {
            text: fields.string("text").unwrap_or_default(),
            created_at: fields.string("createdAt"),
            langs: fields.strings("langs"),
            labels,
            reply,
            embed: fields.get("embed").and_then(Embed::from_ipld),
            tags: fields.strings("tags"),
        }
    }
}

/// Likes and reposts: a strong reference to the post acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRecord {
    pub subject: StrongRef,
    pub created_at: Option<String>,
}

impl SubjectRecord {
    fn from_fields(fields: &Fields<'_>) -> Option<Self> {
        Some(Self {
            subject: fields.map("subject").and_then(|f| StrongRef::from_fields(&f))?,
            created_at: fields.string("createdAt"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowRecord {
    /// DID of the followed account.
    pub subject: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

impl StrongRef {
    fn from_fields(fields: &Fields<'_>) -> Option<Self> {
        Some(Self {
            uri: fields.string("uri").unwrap_or_default(),
            cid: fields.link_or_string("cid")?,
        })
    }
}

/// Parent and thread root of a reply, by content address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub parent: String,
    pub root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub cid: String,
    pub mime_type: String,
    pub size: Option<u64>,
}

impl BlobRef {
    /// Accepts typed blobs (`ref` link) and the legacy `{cid, mimeType}` shape.
    fn from_ipld(ipld: &Ipld) -> Option<Self> {
        let fields = Fields::of(ipld)?;
        let cid = fields
            .link_or_string("ref")
            .or_else(|| fields.string("cid"))?;
        Some(Self {
            cid,
            mime_type: fields.string("mimeType").unwrap_or_default(),
            size: fields.unsigned("size"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEmbed {
    pub blob: BlobRef,
    pub alt: Option<String>,
    pub aspect_ratio: Option<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEmbed {
    pub blob: BlobRef,
    pub alt: Option<String>,
    pub aspect_ratio: Option<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub uri: String,
    pub title: String,
    pub description: String,
    pub thumb: Option<BlobRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Embed {
    Images(Vec<ImageEmbed>),
    Video(VideoEmbed),
    External(ExternalLink),
    Record(StrongRef),
    RecordWithMedia {
        record: StrongRef,
        media: Box<Embed>,
    },
    Unrecognized(String),
}

impl Embed {
    pub fn from_ipld(ipld: &Ipld) -> Option<Self> {
        let fields = Fields::of(ipld)?;
        let kind = fields.str("$type").unwrap_or_default();
        let kind = kind.strip_suffix("#main").unwrap_or(kind);

        let embed = match kind {
            "app.bsky.embed.images" => Self::Images(
                fields
                    .list("images")
                    .filter_map(|image| {
                        let image = Fields::of(image)?;
                        Some(ImageEmbed {
                            blob: image.get("image").and_then(BlobRef::from_ipld)?,
                            alt: image.string("alt"),
                            aspect_ratio: image.aspect_ratio(),
                        })
                    })
                    .collect(),
            ),
            "app.bsky.embed.video" => match fields.get("video").and_then(BlobRef::from_ipld) {
                Some(blob) => Self::Video(VideoEmbed {
                    blob,
                    alt: fields.string("alt"),
                    aspect_ratio: fields.aspect_ratio(),
                }),
                None => Self::Unrecognized(kind.to_string()),
            },
            "app.bsky.embed.external" => match fields.map("external") {
                Some(external) => Self::External(ExternalLink {
                    uri: external.string("uri").unwrap_or_default(),
                    title: external.string("title").unwrap_or_default(),
                    description: external.string("description").unwrap_or_default(),
                    thumb: external.get("thumb").and_then(BlobRef::from_ipld),
                }),
                None => Self::Unrecognized(kind.to_string()),
            },
            "app.bsky.embed.record" => {
                match fields.map("record").and_then(|f| StrongRef::from_fields(&f)) {
                    Some(record) => Self::Record(record),
                    None => Self::Unrecognized(kind.to_string()),
                }
            }
            "app.bsky.embed.recordWithMedia" => {
                let record = fields
                    .map("record")
                    .and_then(|outer| outer.map("record"))
                    .and_then(|f| StrongRef::from_fields(&f));
                let media = fields.get("media").and_then(Self::from_ipld);
                match (record, media) {
                    (Some(record), Some(media)) => Self::RecordWithMedia {
                        record,
                        media: Box::new(media),
                    },
                    (Some(record), None) => Self::Record(record),
                    _ => Self::Unrecognized(kind.to_string()),
                }
            }
            other => Self::Unrecognized(other.to_string()),
        };
        Some(embed)
    }
}

/// Permissive accessor over an IPLD map.
struct Fields<'a>(&'a BTreeMap<String, Ipld>);

impl<'a> Fields<'a> {
    fn of(ipld: &'a Ipld) -> Option<Self> {
        match ipld {
            Ipld::Map(map) => Some(Self(map)),
            _ => None,
        }
    }

    fn get(&self, key: &str) -> Option<&'a Ipld> {
        self.0.get(key)
    }

    fn str(&self, key: &str) -> Option<&'a str> {
        match self.0.get(key) {
            Some(Ipld::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    fn string(&self, key: &str) -> Option<String> {
        self.str(key).map(str::to_string)
    }

    fn unsigned(&self, key: &str) -> Option<u64> {
        match self.0.get(key) {
            Some(Ipld::Integer(value)) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    fn map(&self, key: &str) -> Option<Fields<'a>> {
        self.0.get(key).and_then(Fields::of)
    }

    fn list(&self, key: &str) -> impl Iterator<Item = &'a Ipld> + use<'a> {
        let items: &'a [Ipld] = match self.0.get(key) {
            Some(Ipld::List(items)) => items.as_slice(),
            _ => &[],
        };
        items.iter()
    }

    fn strings(&self, key: &str) -> Vec<String> {
        self.list(key)
            .filter_map(|item| match item {
                Ipld::String(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// A CID stored as a link, a `{"$link": ...}` map, or a plain string.
    fn link_or_string(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Ipld::Link(cid) => Some(cid.to_string()),
            Ipld::String(value) if !value.is_empty() => Some(value.clone()),
            Ipld::Map(map) => match map.get("$link") {
                Some(Ipld::String(value)) => Some(value.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    fn aspect_ratio(&self) -> Option<(u64, u64)> {
        let ratio = self.map("aspectRatio")?;
        Some((ratio.unsigned("width")?, ratio.unsigned("height")?))
    }
}
