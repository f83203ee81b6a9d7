//! Published site objects in S3.

use async_trait::async_trait;
use aws_sdk_s3::types::{Delete, Error as DeleteError, ObjectIdentifier};
use serde::Serialize;

use crate::models::site::Site;

/// Keys listed per page when browsing a branch's files.
pub const FILE_PAGE_SIZE: i32 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ListRequest<'a> {
    pub prefix: &'a str,
    pub delimiter: Option<&'a str>,
    pub start_after: Option<&'a str>,
    pub continuation: Option<String>,
    pub max_keys: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
    pub next_continuation: Option<String>,
    pub is_truncated: bool,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_page(&self, bucket: &str, request: ListRequest<'_>) -> anyhow::Result<ObjectPage>;

    /// Delete up to 1000 keys in one request.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> anyhow::Result<()>;
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_page(&self, bucket: &str, request: ListRequest<'_>) -> anyhow::Result<ObjectPage> {
        let out = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(request.prefix)
            .set_delimiter(request.delimiter.map(str::to_string))
            .set_start_after(request.start_after.map(str::to_string))
            .set_continuation_token(request.continuation)
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("s3 list_objects_v2: {e}"))?;

        Ok(ObjectPage {
            objects: out
                .contents()
                .iter()
                .filter_map(|o| {
                    Some(ObjectInfo {
                        key: o.key()?.to_string(),
                        size: o.size().unwrap_or_default(),
                    })
                })
                .collect(),
            common_prefixes: out
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix().map(str::to_string))
                .collect(),
            next_continuation: out.next_continuation_token().map(str::to_string),
            is_truncated: out.is_truncated().unwrap_or(false),
        })
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> anyhow::Result<()> {
        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<Result<Vec<_>, _>>()?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()?;
        let out = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("s3 delete_objects: {e}"))?;
        check_delete_errors(out.errors())
    }
}

/// A multi-object delete succeeds at the HTTP level even when single keys
/// fail; those come back as per-key errors.
fn check_delete_errors(errors: &[DeleteError]) -> anyhow::Result<()> {
    let Some(first) = errors.first() else {
        return Ok(());
    };
    anyhow::bail!(
        "s3 delete_objects: {} key(s) not deleted, first {:?}: {} {}",
        errors.len(),
        first.key().unwrap_or_default(),
        first.code().unwrap_or("unknown"),
        first.message().unwrap_or_default(),
    )
}

/// Every key under `prefix`, following continuation tokens.
pub async fn list_all_keys(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> anyhow::Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut continuation = None;
    loop {
        let page = store
            .list_page(
                bucket,
                ListRequest {
                    prefix,
                    continuation,
                    ..Default::default()
                },
            )
            .await?;
        keys.extend(page.objects.into_iter().map(|o| o.key));
        match page.next_continuation {
            Some(token) if page.is_truncated => continuation = Some(token),
            _ => break,
        }
    }
    Ok(keys)
}

async fn has_objects(store: &dyn ObjectStore, bucket: &str, prefix: &str) -> anyhow::Result<bool> {
    let page = store
        .list_page(
            bucket,
            ListRequest {
                prefix,
                max_keys: Some(1),
                ..Default::default()
            },
        )
        .await?;
    Ok(!page.objects.is_empty())
}

/// Branches of `site` with published output.
pub async fn published_branches(store: &dyn ObjectStore, site: &Site) -> anyhow::Result<Vec<String>> {
    let bucket = &site.aws_bucket_name;
    let mut branches = Vec::new();

    if has_objects(store, bucket, &format!("{}/", site.path_for_branch(&site.default_branch))).await? {
        branches.push(site.default_branch.clone());
    }
    if let Some(demo) = &site.demo_branch {
        if has_objects(store, bucket, &format!("{}/", site.path_for_branch(demo))).await? {
            branches.push(demo.clone());
        }
    }

    let preview_root = format!("preview/{}/{}/", site.owner, site.repository);
    let mut continuation = None;
    loop {
        let page = store
            .list_page(
                bucket,
                ListRequest {
                    prefix: &preview_root,
                    delimiter: Some("/"),
                    continuation,
                    ..Default::default()
                },
            )
            .await?;
        for prefix in &page.common_prefixes {
            if let Some(branch) = prefix
                .strip_prefix(&preview_root)
                .map(|b| b.trim_end_matches('/'))
                .filter(|b| !b.is_empty())
            {
                branches.push(branch.to_string());
            }
        }
        match page.next_continuation {
            Some(token) if page.is_truncated => continuation = Some(token),
            _ => break,
        }
    }

    Ok(branches)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublishedFile {
    pub name: String,
    pub key: String,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedFilePage {
    pub is_truncated: bool,
    pub files: Vec<PublishedFile>,
}

/// One page of files published for `branch`, starting after `start_at_key`.
pub async fn published_files(
    store: &dyn ObjectStore,
    site: &Site,
    branch: &str,
    start_at_key: Option<&str>,
) -> anyhow::Result<PublishedFilePage> {
    let prefix = format!("{}/", site.path_for_branch(branch));
    let page = store
        .list_page(
            &site.aws_bucket_name,
            ListRequest {
                prefix: &prefix,
                start_after: start_at_key,
                max_keys: Some(FILE_PAGE_SIZE),
                ..Default::default()
            },
        )
        .await?;

    Ok(PublishedFilePage {
        is_truncated: page.is_truncated,
        files: page
            .objects
            .into_iter()
            .map(|o| PublishedFile {
                name: o.key.strip_prefix(&prefix).unwrap_or(&o.key).to_string(),
                key: o.key,
                size: o.size,
            })
            .collect(),
    })
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use super::*;

    /// Bucket-agnostic in-memory store. Lists in key order.
    #[derive(Default)]
    pub struct FakeObjectStore {
        pub objects: Mutex<Vec<ObjectInfo>>,
        pub delete_batches: Mutex<Vec<Vec<String>>>,
        pub page_size: usize,
        /// Keys the fake refuses to delete, as S3 does for a locked object.
        pub locked: Vec<String>,
    }

    impl FakeObjectStore {
        pub fn with_keys<I: IntoIterator<Item = String>>(keys: I, page_size: usize) -> Self {
            let mut objects: Vec<_> = keys
                .into_iter()
                .map(|key| ObjectInfo { key, size: 10 })
                .collect();
            objects.sort_by(|a, b| a.key.cmp(&b.key));
            Self {
                objects: Mutex::new(objects),
                delete_batches: Mutex::default(),
                page_size,
                locked: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for FakeObjectStore {
        async fn list_page(
            &self,
            _bucket: &str,
            request: ListRequest<'_>,
        ) -> anyhow::Result<ObjectPage> {
            let objects = self.objects.lock().unwrap();
            let skip: usize = request
                .continuation
                .as_deref()
                .map(|c| c.parse())
                .transpose()?
                .unwrap_or(0);
            let limit = request
                .max_keys
                .map(|m| m as usize)
                .unwrap_or(self.page_size)
                .min(self.page_size.max(1));

            let mut prefixes = Vec::new();
            let matching: Vec<_> = objects
                .iter()
                .filter(|o| o.key.starts_with(request.prefix))
                .filter(|o| request.start_after.map_or(true, |s| o.key.as_str() > s))
                .filter(|o| match request.delimiter {
                    Some(d) => {
                        let rest = &o.key[request.prefix.len()..];
                        match rest.find(d) {
                            Some(i) => {
                                let p = format!("{}{}", request.prefix, &rest[..=i]);
                                if !prefixes.contains(&p) {
                                    prefixes.push(p);
                                }
                                false
                            }
                            None => true,
                        }
                    }
                    None => true,
                })
                .cloned()
                .collect();

            let page: Vec<_> = matching.iter().skip(skip).take(limit).cloned().collect();
            let is_truncated = skip + page.len() < matching.len();
            Ok(ObjectPage {
                objects: page,
                common_prefixes: prefixes,
                next_continuation: is_truncated.then(|| (skip + limit).to_string()),
                is_truncated,
            })
        }

        async fn delete_objects(&self, _bucket: &str, keys: &[String]) -> anyhow::Result<()> {
            self.objects
                .lock()
                .unwrap()
                .retain(|o| !keys.contains(&o.key) || self.locked.contains(&o.key));
            self.delete_batches.lock().unwrap().push(keys.to_vec());
            let refused: Vec<_> = keys.iter().filter(|k| self.locked.contains(*k)).collect();
            if !refused.is_empty() {
                anyhow::bail!("{} key(s) not deleted: {refused:?}", refused.len());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeObjectStore;
    use super::*;
    use crate::models::site::fixtures::site;

    #[tokio::test]
    async fn listing_follows_continuation() {
        let keys = (0..25).map(|i| format!("site/18f/federalist-docs/{i:03}.html"));
        let store = FakeObjectStore::with_keys(keys, 10);
        let all = list_all_keys(&store, "b", "site/18f/federalist-docs/").await.unwrap();
        assert_eq!(all.len(), 25);
    }

    #[tokio::test]
    async fn branches_with_output() {
        let keys = [
            "site/18f/federalist-docs/index.html",
            "preview/18f/federalist-docs/feature-a/index.html",
            "preview/18f/federalist-docs/feature-b/css/site.css",
        ]
        .map(str::to_string);
        let store = FakeObjectStore::with_keys(keys, 100);
        let branches = published_branches(&store, &site()).await.unwrap();
        assert_eq!(branches, ["main", "feature-a", "feature-b"]);
    }

    #[tokio::test]
    async fn file_pages_strip_the_branch_prefix() {
        let keys = (0..250).map(|i| format!("site/18f/federalist-docs/{i:03}.html"));
        let store = FakeObjectStore::with_keys(keys, 1000);

        let first = published_files(&store, &site(), "main", None).await.unwrap();
        assert!(first.is_truncated);
        assert_eq!(first.files.len(), 200);
        assert_eq!(first.files[0].name, "000.html");
        assert_eq!(first.files[0].key, "site/18f/federalist-docs/000.html");

        let last_key = first.files.last().unwrap().key.clone();
        let second = published_files(&store, &site(), "main", Some(&last_key))
            .await
            .unwrap();
        assert!(!second.is_truncated);
        assert_eq!(second.files.len(), 50);
        assert_eq!(second.files[0].name, "200.html");
    }

    #[test]
    fn per_key_delete_errors_fail_the_batch() {
        assert!(check_delete_errors(&[]).is_ok());

        let errors = [
            DeleteError::builder()
                .key("site/18f/federalist-docs/index.html")
                .code("AccessDenied")
                .message("Access Denied")
                .build(),
            DeleteError::builder().key("site/18f/federalist-docs/404.html").build(),
        ];
        let message = check_delete_errors(&errors).unwrap_err().to_string();
        assert!(message.contains("2 key(s) not deleted"));
        assert!(message.contains("site/18f/federalist-docs/index.html"));
        assert!(message.contains("AccessDenied"));
    }
}
