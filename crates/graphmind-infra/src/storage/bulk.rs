//! Vendor-agnostic chunked deletion and paginated listing.

use std::collections::HashSet;
use std::future::Future;

use tracing::{debug, warn};

use crate::error::InfraResult;
use crate::storage::types::{BulkDeleteResult, FailedDeletion, ListAllObjectKeysResult};

/// S3 accepts at most this many keys per DeleteObjects call.
pub const DELETE_BATCH_SIZE: usize = 1000;

/// What the vendor reported for one DeleteObjects call.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub deleted: Vec<String>,
    pub failed: Vec<FailedDeletion>,
}

/// One page of a listing.
#[derive(Debug, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
}

/// Deletes `keys` in chunks of [`DELETE_BATCH_SIZE`], one `delete_chunk`
/// call per chunk, in order.
///
/// A chunk whose call fails marks all of its keys failed with that error;
/// later chunks still run.
pub async fn delete_in_chunks<F, Fut>(keys: &[String], mut delete_chunk: F) -> BulkDeleteResult
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = InfraResult<ChunkOutcome>>,
{
    let mut result = BulkDeleteResult {
        total: keys.len(),
        ..Default::default()
    };

    for chunk in keys.chunks(DELETE_BATCH_SIZE) {
        let requested: HashSet<&str> = chunk.iter().map(String::as_str).collect();

        match delete_chunk(chunk.to_vec()).await {
            Ok(outcome) => {
                let reported: HashSet<&str> = outcome
                    .deleted
                    .iter()
                    .map(String::as_str)
                    .chain(outcome.failed.iter().map(|f| f.key.as_str()))
                    .collect();
                let omitted = requested.difference(&reported).count();
                if omitted > 0 {
                    warn!(omitted, "Vendor did not report the outcome of some deletions");
                }

                let deleted: HashSet<String> = outcome
                    .deleted
                    .into_iter()
                    .filter(|k| requested.contains(k.as_str()))
                    .collect();
                let mut failed_seen = HashSet::new();
                // A key counts once: deleted wins over failed.
                result.failed.extend(outcome.failed.into_iter().filter(|f| {
                    requested.contains(f.key.as_str())
                        && !deleted.contains(&f.key)
                        && failed_seen.insert(f.key.clone())
                }));
                result.deleted_keys.extend(deleted);
            }
            Err(e) => {
                warn!(error = %e, keys = chunk.len(), "Batch delete call failed");
                let message = e.to_string();
                result.failed.extend(chunk.iter().map(|key| FailedDeletion {
                    key: key.clone(),
                    error: message.clone(),
                }));
            }
        }
    }

    debug!(
        total = result.total,
        deleted = result.deleted_keys.len(),
        failed = result.failed.len(),
        "Bulk delete finished"
    );
    result
}

/// Follows continuation tokens until the vendor stops returning one.
///
/// The truncation flag is not consulted. A token the vendor has already
/// returned ends the loop. Keys and common prefixes are de-duplicated,
/// keeping first-seen order.
pub async fn collect_pages<F, Fut>(mut fetch_page: F) -> InfraResult<ListAllObjectKeysResult>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = InfraResult<ListPage>>,
{
    let mut result = ListAllObjectKeysResult::default();
    let mut seen_keys = HashSet::new();
    let mut seen_prefixes = HashSet::new();
    let mut seen_tokens = HashSet::new();
    let mut token: Option<String> = None;

    loop {
        let page = fetch_page(token.take()).await?;

        for key in page.keys {
            if seen_keys.insert(key.clone()) {
                result.keys.push(key);
            }
        }
        for prefix in page.common_prefixes {
            if seen_prefixes.insert(prefix.clone()) {
                result.common_prefixes.push(prefix);
            }
        }

        match page.next_token {
            Some(next) if seen_tokens.insert(next.clone()) => token = Some(next),
            Some(next) => {
                warn!(token = %next, "Listing returned a repeated continuation token");
                break;
            }
            None => break,
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InfraError;
    use std::sync::Mutex;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("obj-{i:05}")).collect()
    }

    #[tokio::test]
    async fn test_2500_keys_take_three_calls() {
        let calls = Mutex::new(Vec::new());

        let result = delete_in_chunks(&keys(2500), |chunk| {
            calls.lock().unwrap().push(chunk.len());
            async move {
                Ok(ChunkOutcome {
                    deleted: chunk,
                    failed: Vec::new(),
                })
            }
        })
        .await;

        assert_eq!(*calls.lock().unwrap(), vec![1000, 1000, 500]);
        assert_eq!(result.total, 2500);
        assert_eq!(result.deleted_keys.len(), 2500);
        assert!(result.deleted_keys.len() + result.failed.len() <= result.total);
    }

    #[tokio::test]
    async fn test_failed_chunk_marks_its_keys_and_later_chunks_run() {
        let mut call = 0;

        let result = delete_in_chunks(&keys(2500), |chunk| {
            call += 1;
            let fail = call == 2;
            async move {
                if fail {
                    Err(InfraError::Storage {
                        operation: "delete_objects",
                        message: "slow down".to_string(),
                        status: Some(503),
                    })
                } else {
                    Ok(ChunkOutcome {
                        deleted: chunk,
                        failed: Vec::new(),
                    })
                }
            }
        })
        .await;

        assert_eq!(call, 3);
        assert_eq!(result.deleted_keys.len(), 1500);
        assert_eq!(result.failed.len(), 1000);
        assert!(result.failed[0].error.contains("slow down"));
        assert_eq!(result.failed[0].key, "obj-01000");
    }

    #[tokio::test]
    async fn test_omitted_and_unrequested_keys_are_not_counted() {
        let input = keys(3);

        let result = delete_in_chunks(&input, |_chunk| async {
            Ok(ChunkOutcome {
                deleted: vec!["obj-00000".to_string(), "stranger".to_string()],
                failed: vec![FailedDeletion {
                    key: "obj-00001".to_string(),
                    error: "AccessDenied".to_string(),
                }],
            })
        })
        .await;

        assert_eq!(result.deleted_keys.len(), 1);
        assert!(result.deleted_keys.contains("obj-00000"));
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.total, 3);
    }

    #[tokio::test]
    async fn test_failed_keys_outside_chunk_or_already_deleted_are_dropped() {
        let input = keys(3);

        let result = delete_in_chunks(&input, |_chunk| async {
            let failed = |key: &str| FailedDeletion {
                key: key.to_string(),
                error: "InternalError".to_string(),
            };
            Ok(ChunkOutcome {
                deleted: vec!["obj-00000".to_string()],
                failed: vec![
                    failed("obj-00000"),
                    failed("obj-00001"),
                    failed("obj-00001"),
                    failed("stranger"),
                ],
            })
        })
        .await;

        assert_eq!(result.deleted_keys.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].key, "obj-00001");
        assert!(result.deleted_keys.len() + result.failed.len() <= result.total);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let mut calls = 0;
        let result = delete_in_chunks(&[], |_chunk| {
            calls += 1;
            async { Ok(ChunkOutcome::default()) }
        })
        .await;

        assert_eq!(calls, 0);
        assert_eq!(result, BulkDeleteResult::default());
    }

    #[tokio::test]
    async fn test_three_pages_are_unioned_without_duplicates() {
        let pages = Mutex::new(vec![
            ListPage {
                keys: vec!["a".into(), "b".into()],
                common_prefixes: vec![],
                next_token: Some("t1".into()),
            },
            ListPage {
                keys: vec!["b".into(), "c".into()],
                common_prefixes: vec!["dir/".into()],
                next_token: Some("t2".into()),
            },
            ListPage {
                keys: vec!["d".into()],
                common_prefixes: vec!["dir/".into()],
                next_token: None,
            },
        ]);
        let tokens = Mutex::new(Vec::new());

        let result = collect_pages(|token| {
            tokens.lock().unwrap().push(token);
            let page = pages.lock().unwrap().remove(0);
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(result.keys, vec!["a", "b", "c", "d"]);
        assert_eq!(result.common_prefixes, vec!["dir/"]);
        assert_eq!(
            *tokens.lock().unwrap(),
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_repeated_token_stops_listing() {
        let mut calls = 0;

        let result = collect_pages(|_token| {
            calls += 1;
            let page = ListPage {
                keys: vec![format!("k{calls}")],
                common_prefixes: vec![],
                next_token: Some("same".into()),
            };
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(result.keys, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_page_error_propagates() {
        let result = collect_pages(|_token| async {
            Err::<ListPage, _>(InfraError::Storage {
                operation: "list_objects",
                message: "denied".to_string(),
                status: Some(403),
            })
        })
        .await;

        assert!(matches!(result, Err(InfraError::Storage { status: Some(403), .. })));
    }
}
