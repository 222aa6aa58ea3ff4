//! Document identifier type resolution.
//!
//! A document `_id` arrives as text, but may be stored as an ObjectId, an
//! integer or a string. Candidates are tried in decreasing likelihood and the
//! first match wins.

use mongodb::bson::{Bson, Document, doc, oid::ObjectId};
use std::time::Duration;

use crate::error::{AdminError, StoreError};
use crate::store::StoreClient;

/// A document found together with the typed `_id` that matched it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDocument {
    pub id: Bson,
    pub document: Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hypothesis {
    ObjectId,
    Integer,
    String,
}

impl Hypothesis {
    /// Ordered hypotheses for an input shape. ObjectId-shaped input (24 hex digits)
    /// never tries integer.
    fn sequence_for(raw_id: &str) -> &'static [Hypothesis] {
        if ObjectId::parse_str(raw_id).is_ok() {
            &[Self::ObjectId, Self::String]
        } else {
            &[Self::Integer, Self::String]
        }
    }

    /// Candidate `_id` value, `None` when the input can't take this form
    fn candidate(self, raw_id: &str) -> Option<Bson> {
        match self {
            Self::ObjectId => ObjectId::parse_str(raw_id).ok().map(Bson::ObjectId),
            Self::Integer => parse_integer(raw_id),
            Self::String => Some(Bson::String(raw_id.to_string())),
        }
    }
}

/// Strict decimal integer, int32 when it fits
fn parse_integer(raw_id: &str) -> Option<Bson> {
    let value: i64 = raw_id.parse().ok()?;
    Some(match i32::try_from(value) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(value),
    })
}

enum Attempt {
    Matched(Document),
    NotMatched,
    Failed(StoreError),
}

async fn attempt(
    client: &dyn StoreClient,
    database: &str,
    collection: &str,
    candidate: &Bson,
    deadline: Duration,
) -> Attempt {
    let lookup = client.find_one(database, collection, doc! { "_id": candidate.clone() });
    match tokio::time::timeout(deadline, lookup).await {
        Ok(Ok(Some(document))) => Attempt::Matched(document),
        Ok(Ok(None)) => Attempt::NotMatched,
        Ok(Err(e)) => Attempt::Failed(e),
        Err(_) => Attempt::Failed(StoreError::Timeout(deadline)),
    }
}

/// Find the document whose `_id` matches `raw_id` under any supported encoding.
///
/// Returns `Ok(None)` without touching the store when `raw_id` is empty.
pub async fn resolve_identifier(
    client: &dyn StoreClient,
    database: &str,
    collection: &str,
    raw_id: Option<&str>,
    deadline: Duration,
) -> Result<Option<ResolvedDocument>, AdminError> {
    let Some(raw_id) = raw_id.filter(|id| !id.is_empty()) else {
        return Ok(None);
    };

    for hypothesis in Hypothesis::sequence_for(raw_id) {
        let Some(candidate) = hypothesis.candidate(raw_id) else {
            continue;
        };

        match attempt(client, database, collection, &candidate, deadline).await {
            Attempt::Matched(document) => {
                tracing::debug!(
                    "Resolved _id '{}' in {}.{} as {:?}",
                    raw_id,
                    database,
                    collection,
                    hypothesis
                );
                return Ok(Some(ResolvedDocument {
                    id: candidate,
                    document,
                }));
            }
            Attempt::NotMatched => continue,
            Attempt::Failed(source) => {
                return Err(AdminError::Lookup {
                    collection: collection.to_string(),
                    source,
                });
            }
        }
    }

    Err(AdminError::DocumentNotFound {
        collection: collection.to_string(),
        id: raw_id.to_string(),
    })
}
