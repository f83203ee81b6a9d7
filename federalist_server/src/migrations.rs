//! Schema migration, run once at startup.

use diesel_async::AsyncPgConnection;
use diesel_async::SimpleAsyncConnection;

/// SQL migration for all Federalist tables.
///
/// Idempotent: every statement is guarded with `IF NOT EXISTS`.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                  BIGSERIAL PRIMARY KEY,
    username            VARCHAR(255) NOT NULL UNIQUE,
    email               VARCHAR(255),
    github_access_token VARCHAR(255),
    github_user_id      VARCHAR(64),
    signed_in_at        TIMESTAMPTZ,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at          TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS organizations (
    id          BIGSERIAL PRIMARY KEY,
    name        VARCHAR(255) NOT NULL UNIQUE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS organization_users (
    organization_id BIGINT NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    user_id         BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role            VARCHAR(32) NOT NULL DEFAULT 'user',
    PRIMARY KEY (organization_id, user_id)
);

CREATE TABLE IF NOT EXISTS sites (
    id                  BIGSERIAL PRIMARY KEY,
    owner               VARCHAR(255) NOT NULL,
    repository          VARCHAR(255) NOT NULL,
    engine              VARCHAR(16) NOT NULL DEFAULT 'static',
    default_branch      VARCHAR(255) NOT NULL DEFAULT 'master',
    demo_branch         VARCHAR(255),
    domain              VARCHAR(512),
    demo_domain         VARCHAR(512),
    config              JSONB,
    preview_config      JSONB,
    demo_config         JSONB,
    build_status        VARCHAR(16) NOT NULL DEFAULT 'active',
    s3_service_name     VARCHAR(255) NOT NULL,
    aws_bucket_name     VARCHAR(255) NOT NULL,
    aws_bucket_region   VARCHAR(64) NOT NULL,
    subdomain           VARCHAR(63) NOT NULL,
    organization_id     BIGINT REFERENCES organizations(id),
    published_at        TIMESTAMPTZ,
    repo_last_verified  TIMESTAMPTZ,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    deleted_at          TIMESTAMPTZ
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sites_owner_repo
    ON sites (owner, repository) WHERE deleted_at IS NULL;

ALTER TABLE sites DROP CONSTRAINT IF EXISTS sites_subdomain_key;
CREATE UNIQUE INDEX IF NOT EXISTS idx_sites_subdomain
    ON sites (subdomain) WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS site_users (
    site_id     BIGINT NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    user_id     BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (site_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_site_users_user ON site_users (user_id);

CREATE TABLE IF NOT EXISTS builds (
    id              BIGSERIAL PRIMARY KEY,
    site_id         BIGINT NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    user_id         BIGINT NOT NULL REFERENCES users(id),
    branch          VARCHAR(255) NOT NULL,
    commit_sha      VARCHAR(40),
    state           VARCHAR(16) NOT NULL DEFAULT 'queued',
    token           VARCHAR(64) NOT NULL,
    error           TEXT,
    completed_at    TIMESTAMPTZ,
    dispatched_at   TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_builds_site ON builds (site_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_builds_state ON builds (state);
CREATE UNIQUE INDEX IF NOT EXISTS idx_builds_pending_branch
    ON builds (site_id, branch) WHERE state IN ('created', 'queued');

ALTER TABLE builds ADD COLUMN IF NOT EXISTS dispatched_at TIMESTAMPTZ;
ALTER TABLE builds ALTER COLUMN state SET DEFAULT 'queued';
CREATE INDEX IF NOT EXISTS idx_builds_undispatched
    ON builds (created_at) WHERE dispatched_at IS NULL AND state = 'queued';

CREATE TABLE IF NOT EXISTS build_logs (
    id          BIGSERIAL PRIMARY KEY,
    build_id    BIGINT NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
    source      VARCHAR(255) NOT NULL,
    output      TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_build_logs_build ON build_logs (build_id, source);

CREATE TABLE IF NOT EXISTS user_actions (
    id          BIGSERIAL PRIMARY KEY,
    user_id     BIGINT NOT NULL REFERENCES users(id),
    target_id   BIGINT NOT NULL,
    target_type VARCHAR(32) NOT NULL,
    action      VARCHAR(16) NOT NULL,
    site_id     BIGINT NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_user_actions_site ON user_actions (site_id);

CREATE TABLE IF NOT EXISTS events (
    id          BIGSERIAL PRIMARY KEY,
    event_type  VARCHAR(16) NOT NULL,
    label       VARCHAR(64) NOT NULL,
    model       VARCHAR(64),
    model_id    BIGINT,
    body        JSONB NOT NULL DEFAULT '{}',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_events_label ON events (label, created_at DESC);
"#;

/// Run the schema migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statements() -> impl Iterator<Item = String> {
        MIGRATION_SQL
            .split(';')
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    #[test]
    fn site_uniqueness_only_covers_live_rows() {
        let sites_table = statements()
            .find(|s| s.starts_with("CREATE TABLE IF NOT EXISTS sites "))
            .unwrap();
        assert!(!sites_table.contains("UNIQUE"));

        let unique_on_sites: Vec<_> = statements()
            .filter(|s| s.starts_with("CREATE UNIQUE INDEX") && s.contains(" ON sites "))
            .collect();
        assert_eq!(unique_on_sites.len(), 2);
        for index in &unique_on_sites {
            assert!(index.ends_with("WHERE deleted_at IS NULL"), "{index}");
        }
        assert!(statements()
            .any(|s| s == "ALTER TABLE sites DROP CONSTRAINT IF EXISTS sites_subdomain_key"));
    }

    #[test]
    fn builds_start_queued_and_track_dispatch() {
        let builds_table = statements()
            .find(|s| s.starts_with("CREATE TABLE IF NOT EXISTS builds "))
            .unwrap();
        assert!(builds_table.contains("state VARCHAR(16) NOT NULL DEFAULT 'queued'"));
        assert!(builds_table.contains("dispatched_at TIMESTAMPTZ"));
    }
}
