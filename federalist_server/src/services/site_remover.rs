//! Removing a site's published objects and dedicated infrastructure.

use crate::config::AppConfig;
use crate::models::site::Site;
use crate::services::cf_client::CfClient;
use crate::services::object_store::{list_all_keys, ObjectStore};

/// S3 caps a multi-object delete at 1000 keys.
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Delete everything the site has published. Returns the number of keys removed.
///
/// The bare `site/`, `demo/` and `preview/` prefixes are redirect objects and
/// only exist alongside published content, so they are deleted only when
/// something was found under them.
pub async fn remove_site_objects(store: &dyn ObjectStore, site: &Site) -> anyhow::Result<usize> {
    let bucket = &site.aws_bucket_name;
    let prefixes = site.published_prefixes();

    let mut keys = Vec::new();
    for prefix in &prefixes {
        keys.extend(list_all_keys(store, bucket, &format!("{prefix}/")).await?);
    }
    if keys.is_empty() {
        return Ok(0);
    }
    keys.extend(prefixes);

    for batch in keys.chunks(DELETE_BATCH_SIZE) {
        store.delete_objects(bucket, batch).await?;
    }

    crate::metrics::s3_objects_deleted(keys.len());
    tracing::info!(site_id = site.id, count = keys.len(), "Site objects removed");
    Ok(keys.len())
}

/// Whether the site has its own bucket rather than the shared one.
pub fn has_dedicated_bucket(site: &Site, config: &AppConfig) -> bool {
    site.s3_service_name != config.s3.service_name
}

/// Delete the site's proxy route and S3 service instance, if it has its own.
pub async fn remove_infrastructure(
    cf: Option<&CfClient>,
    site: &Site,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let Some(cf) = cf else {
        return Ok(());
    };
    if !has_dedicated_bucket(site, config) {
        return Ok(());
    }
    cf.remove_site_bucket(&site.s3_service_name, &site.aws_bucket_name)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::models::site::fixtures::site;
    use crate::services::object_store::fakes::FakeObjectStore;

    #[tokio::test]
    async fn deletes_in_batches_of_one_thousand() {
        let s = site();
        let keys = (0..2500).map(|i| format!("preview/18f/federalist-docs/b/{i:05}.html"));
        let store = FakeObjectStore::with_keys(keys, 1000);

        let removed = remove_site_objects(&store, &s).await.unwrap();
        assert_eq!(removed, 2503);

        let batches = store.delete_batches.lock().unwrap();
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, [1000, 1000, 503]);
        let last = batches.last().unwrap();
        assert!(last.contains(&"site/18f/federalist-docs".to_string()));
        assert!(last.contains(&"preview/18f/federalist-docs".to_string()));
    }

    #[tokio::test]
    async fn nothing_published_means_nothing_deleted() {
        let store = FakeObjectStore::with_keys(
            ["site/18f/other-repo/index.html".to_string()],
            1000,
        );
        let removed = remove_site_objects(&store, &site()).await.unwrap();
        assert_eq!(removed, 0);
        assert!(store.delete_batches.lock().unwrap().is_empty());
        assert_eq!(store.objects.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_the_sites_prefixes_are_touched() {
        let store = FakeObjectStore::with_keys(
            [
                "site/18f/federalist-docs/index.html".to_string(),
                "site/18f/federalist-docs-two/index.html".to_string(),
            ],
            1000,
        );
        remove_site_objects(&store, &site()).await.unwrap();
        let left: Vec<_> = store
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.key.clone())
            .collect();
        assert_eq!(left, ["site/18f/federalist-docs-two/index.html"]);
    }

    #[tokio::test]
    async fn refused_keys_fail_the_removal() {
        let locked = "site/18f/federalist-docs/index.html".to_string();
        let mut store = FakeObjectStore::with_keys(
            [locked.clone(), "site/18f/federalist-docs/about.html".to_string()],
            1000,
        );
        store.locked = vec![locked.clone()];

        let err = remove_site_objects(&store, &site()).await.unwrap_err();
        assert!(err.to_string().contains(&locked));
        let left: Vec<_> = store
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.key.clone())
            .collect();
        assert_eq!(left, [locked]);
    }

    #[test]
    fn shared_bucket_is_never_torn_down() {
        let config = test_config();
        let mut s = site();
        s.s3_service_name = config.s3.service_name.clone();
        assert!(!has_dedicated_bucket(&s, &config));
        s.s3_service_name = "o-18f-r-federalist-docs".to_string();
        assert!(has_dedicated_bucket(&s, &config));
    }
}
