use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::decode::CreatedRecord;
use crate::ports::blobs::BlobFetcher;
use crate::records::{
    BlobRef, Embed, ExternalLink, FollowRecord, PostRecord, Record, ReplyRef, SubjectRecord,
};

/// A normalized post, keyed by the content address of its creating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPost {
    pub cid: String,
    pub post_id: String,
    pub uri: String,
    pub author: String,
    pub text: String,
    pub created_at: Option<String>,
    pub language: Vec<String>,
    pub labels: Vec<String>,
    pub reply: Option<ReplyRef>,
    pub images: Vec<MediaRef>,
    pub videos: Vec<MediaRef>,
    pub external_links: Vec<ExternalLink>,
    pub quotes: Vec<QuoteRef>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrecognized_embed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub cid: String,
    pub mime_type: String,
    pub size: Option<u64>,
    pub alt: Option<String>,
    pub aspect_ratio: Option<(u64, u64)>,
    /// Byte length of the blob when it was downloaded eagerly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_bytes: Option<u64>,
}

impl MediaRef {
    fn new(blob: BlobRef, alt: Option<String>, aspect_ratio: Option<(u64, u64)>) -> Self {
        Self {
            cid: blob.cid,
            mime_type: blob.mime_type,
            size: blob.size,
            alt,
            aspect_ratio,
            fetched_bytes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRef {
    pub cid: String,
    pub uri: String,
}

/// A like or repost: the author acting on `subject_cid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectEdge {
    pub author: String,
    pub subject_cid: String,
    pub cid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowEdge {
    pub author: String,
    pub subject: String,
    pub cid: String,
}

/// Everything the persistence layer knows how to write.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphWrite {
    Post(NormalizedPost),
    Like(SubjectEdge),
    Repost(SubjectEdge),
    Follow(FollowEdge),
}

impl GraphWrite {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Post(_) => "post",
            Self::Like(_) => "like",
            Self::Repost(_) => "repost",
            Self::Follow(_) => "follow",
        }
    }

    pub fn cid(&self) -> &str {
        match self {
            Self::Post(post) => &post.cid,
            Self::Like(edge) | Self::Repost(edge) => &edge.cid,
            Self::Follow(follow) => &follow.cid,
        }
    }
}

#[derive(Clone, Default)]
pub struct Materializer {
    blobs: Option<Arc<dyn BlobFetcher>>,
}

impl Materializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables eager blob download for image and video embeds.
    pub fn with_blob_fetcher(blobs: Arc<dyn BlobFetcher>) -> Self {
        Self { blobs: Some(blobs) }
    }

    pub async fn materialize(&self, created: CreatedRecord) -> GraphWrite {
        let CreatedRecord {
            record,
            uri,
            cid,
            author,
        } = created;
        match record {
            Record::Post(post) => {
                let mut post = normalize_post(post, cid, uri.rkey.clone(), uri.to_string(), author);
                self.fetch_media(&mut post).await;
                GraphWrite::Post(post)
            }
            Record::Like(SubjectRecord { subject, .. }) => GraphWrite::Like(SubjectEdge {
                author,
                subject_cid: subject.cid,
                cid,
            }),
            Record::Repost(SubjectRecord { subject, .. }) => GraphWrite::Repost(SubjectEdge {
                author,
                subject_cid: subject.cid,
                cid,
            }),
            Record::Follow(FollowRecord { subject, .. }) => GraphWrite::Follow(FollowEdge {
                author,
                subject,
                cid,
            }),
        }
    }

    async fn fetch_media(&self, post: &mut NormalizedPost) {
        let Some(blobs) = &self.blobs else {
            return;
        };
        let author = post.author.clone();
        for media in post.images.iter_mut().chain(post.videos.iter_mut()) {
            match blobs.fetch_blob(&author, &media.cid).await {
                Ok(bytes) => media.fetched_bytes = Some(bytes.len() as u64),
                Err(err) => {
                    tracing::warn!(error = %err, author, cid = media.cid, "blob fetch failed");
                }
            }
        }
    }
}

/// Pure part of materialization: flattens the embed union into media lists.
pub fn normalize_post(
    record: PostRecord,
    cid: String,
    post_id: String,
    uri: String,
    author: String,
) -> NormalizedPost {
    let mut post = NormalizedPost {
        cid,
        post_id,
        uri,
        author,
        text: record.text,
        created_at: record.created_at.as_deref().and_then(normalize_timestamp),
        language: record.langs,
        labels: record.labels,
        reply: record.reply,
        images: Vec::new(),
        videos: Vec::new(),
        external_links: Vec::new(),
        quotes: Vec::new(),
        tags: record.tags,
        unrecognized_embed: None,
    };
    if let Some(embed) = record.embed {
        flatten_embed(&mut post, embed, true);
    }
    post
}

fn flatten_embed(post: &mut NormalizedPost, embed: Embed, top_level: bool) {
    match embed {
        Embed::Images(images) => post.images.extend(
            images
                .into_iter()
                .map(|image| MediaRef::new(image.blob, image.alt, image.aspect_ratio)),
        ),
        Embed::Video(video) => {
            post.videos
                .push(MediaRef::new(video.blob, video.alt, video.aspect_ratio));
        }
        Embed::External(link) => post.external_links.push(link),
        // one level only: quotes nested under a quote are not expanded
        Embed::Record(_) | Embed::RecordWithMedia { .. } if !top_level => {}
        Embed::Record(record) => post.quotes.push(QuoteRef {
            cid: record.cid,
            uri: record.uri,
        }),
        Embed::RecordWithMedia { record, media } => {
            post.quotes.push(QuoteRef {
                cid: record.cid,
                uri: record.uri,
            });
            flatten_embed(post, *media, false);
        }
        Embed::Unrecognized(kind) => post.unrecognized_embed = Some(kind),
    }
}

fn normalize_timestamp(value: &str) -> Option<String> {
    match OffsetDateTime::parse(value, &Rfc3339) {
        Ok(parsed) => parsed.format(&Rfc3339).ok(),
        Err(err) => {
            tracing::debug!(value, error = %err, "dropping unparseable createdAt");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ImageEmbed, StrongRef, VideoEmbed};

    fn blob(cid: &str) -> BlobRef {
        BlobRef {
            cid: cid.to_string(),
            mime_type: "image/jpeg".to_string(),
            size: Some(10),
        }
    }

    fn post_with(embed: Option<Embed>) -> NormalizedPost {
        normalize_post(
            PostRecord {
                text: "hi".to_string(),
                created_at: Some("2024-11-29T03:01:11Z".to_string()),
                embed,
                ..PostRecord::default()
            },
            "cid-post".to_string(),
            "3lc2looeiuc2n".to_string(),
            "at://did:plc:a/app.bsky.feed.post/3lc2looeiuc2n".to_string(),
            "did:plc:a".to_string(),
        )
    }

    #[test]
    fn quote_with_media_surfaces_media_at_top_level() {
        let post = post_with(Some(Embed::RecordWithMedia {
            record: StrongRef {
                uri: "at://did:plc:q/app.bsky.feed.post/9".to_string(),
                cid: "cid-quoted".to_string(),
            },
            media: Box::new(Embed::Images(vec![ImageEmbed {
                blob: blob("cid-img"),
                alt: Some("alt".to_string()),
                aspect_ratio: None,
            }])),
        }));
        assert_eq!(post.images.len(), 1);
        assert_eq!(post.images[0].cid, "cid-img");
        assert_eq!(post.quotes.len(), 1);
        assert_eq!(post.quotes[0].cid, "cid-quoted");
        assert!(post.videos.is_empty());
    }

    #[test]
    fn nested_quote_chains_are_not_expanded() {
        let inner = Embed::RecordWithMedia {
            record: StrongRef {
                uri: String::new(),
                cid: "cid-inner".to_string(),
            },
            media: Box::new(Embed::Video(VideoEmbed {
                blob: blob("cid-vid"),
                alt: None,
                aspect_ratio: None,
            })),
        };
        let post = post_with(Some(Embed::RecordWithMedia {
            record: StrongRef {
                uri: String::new(),
                cid: "cid-outer".to_string(),
            },
            media: Box::new(inner),
        }));
        let quoted: Vec<_> = post.quotes.iter().map(|quote| quote.cid.as_str()).collect();
        assert_eq!(quoted, vec!["cid-outer"]);
        assert!(post.videos.is_empty());
    }

    #[test]
    fn timestamps_are_normalized_or_dropped() {
        let post = post_with(None);
        assert_eq!(post.created_at.as_deref(), Some("2024-11-29T03:01:11Z"));
        assert_eq!(normalize_timestamp("yesterday"), None);
    }

    #[test]
    fn unrecognized_embed_is_recorded() {
        let post = post_with(Some(Embed::Unrecognized("app.bsky.embed.poll".to_string())));
        assert_eq!(post.unrecognized_embed.as_deref(), Some("app.bsky.embed.poll"));
    }
}
