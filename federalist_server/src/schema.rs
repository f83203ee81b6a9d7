//! Diesel table definitions.
//!
//! Tables: users, sites, site_users, builds, build_logs, organizations,
//! organization_users, user_actions, events.

diesel::table! {
    users (id) {
        id -> Int8,
        username -> Varchar,
        email -> Nullable<Varchar>,
        github_access_token -> Nullable<Varchar>,
        github_user_id -> Nullable<Varchar>,
        signed_in_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    sites (id) {
        id -> Int8,
        owner -> Varchar,
        repository -> Varchar,
        engine -> Varchar,
        default_branch -> Varchar,
        demo_branch -> Nullable<Varchar>,
        domain -> Nullable<Varchar>,
        demo_domain -> Nullable<Varchar>,
        config -> Nullable<Jsonb>,
        preview_config -> Nullable<Jsonb>,
        demo_config -> Nullable<Jsonb>,
        build_status -> Varchar,
        s3_service_name -> Varchar,
        aws_bucket_name -> Varchar,
        aws_bucket_region -> Varchar,
        subdomain -> Varchar,
        organization_id -> Nullable<Int8>,
        published_at -> Nullable<Timestamptz>,
        repo_last_verified -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    site_users (site_id, user_id) {
        site_id -> Int8,
        user_id -> Int8,
    }
}

diesel::table! {
    builds (id) {
        id -> Int8,
        site_id -> Int8,
        user_id -> Int8,
        branch -> Varchar,
        commit_sha -> Nullable<Varchar>,
        state -> Varchar,
        token -> Varchar,
        error -> Nullable<Text>,
        completed_at -> Nullable<Timestamptz>,
        dispatched_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    build_logs (id) {
        id -> Int8,
        build_id -> Int8,
        source -> Varchar,
        output -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    organizations (id) {
        id -> Int8,
        name -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    organization_users (organization_id, user_id) {
        organization_id -> Int8,
        user_id -> Int8,
        role -> Varchar,
    }
}

diesel::table! {
    user_actions (id) {
        id -> Int8,
        user_id -> Int8,
        target_id -> Int8,
        target_type -> Varchar,
        action -> Varchar,
        site_id -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    events (id) {
        id -> Int8,
        event_type -> Varchar,
        label -> Varchar,
        model -> Nullable<Varchar>,
        model_id -> Nullable<Int8>,
        body -> Jsonb,
        created_at -> Timestamptz,
    }
}

// Foreign key relationships
diesel::joinable!(site_users -> sites (site_id));
diesel::joinable!(site_users -> users (user_id));
diesel::joinable!(builds -> sites (site_id));
diesel::joinable!(builds -> users (user_id));
diesel::joinable!(build_logs -> builds (build_id));
diesel::joinable!(sites -> organizations (organization_id));
diesel::joinable!(organization_users -> organizations (organization_id));
diesel::joinable!(organization_users -> users (user_id));
diesel::joinable!(user_actions -> sites (site_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    sites,
    site_users,
    builds,
    build_logs,
    organizations,
    organization_users,
    user_actions,
    events,
);
