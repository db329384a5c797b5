// Diesel table definitions for the ingestion ledger.
// Kept in sync by hand with `repository::SCHEMA_SQL`.

diesel::table! {
    crawl_ledger (id) {
        id -> Integer,
        url -> Text,
        source -> Text,
        state -> Text,
        discovered_at -> Text,
        last_fetched_at -> Nullable<Text>,
        http_status -> Nullable<Integer>,
        text_hash -> Nullable<Text>,
        minhash_signature -> Nullable<Text>,
        silver_id -> Nullable<Text>,
        retry_count -> Integer,
        error_message -> Nullable<Text>,
        etag -> Nullable<Text>,
        last_modified -> Nullable<Text>,
        content_length -> Nullable<BigInt>,
        metadata -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    pipeline_runs (run_id) {
        run_id -> Text,
        source -> Text,
        pipeline_type -> Text,
        start_time -> Text,
        end_time -> Nullable<Text>,
        status -> Text,
        records_discovered -> BigInt,
        records_processed -> BigInt,
        records_failed -> BigInt,
        records_skipped -> BigInt,
        records_duplicate -> BigInt,
        errors -> Text,
        config_snapshot -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(crawl_ledger, pipeline_runs);
