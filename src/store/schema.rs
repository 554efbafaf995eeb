// @generated by hand to match migrations/2024-01-01-000000_create_tables

diesel::table! {
    log_entries (uid) {
        uid -> BigInt,
        severity -> Integer,
        message -> Text,
        timestamp -> BigInt,
    }
}

diesel::table! {
    attributes (uid) {
        uid -> BigInt,
        name -> Text,
        value -> Text,
    }
}

diesel::table! {
    proc_stats (uid) {
        uid -> BigInt,
        nproc -> Integer,
        cpu -> Double,
        mem -> BigInt,
        vmem -> BigInt,
        timestamp -> BigInt,
    }
}

diesel::table! {
    metrics (uid) {
        uid -> BigInt,
        scope -> Text,
        name -> Text,
        value -> BigInt,
    }
}

diesel::table! {
    child_entries (uid) {
        uid -> BigInt,
        ident -> Text,
        server_url -> Text,
        db_file -> Text,
        started -> Nullable<BigInt>,
        updated -> Nullable<BigInt>,
        stopped -> Nullable<BigInt>,
        result -> Integer,
        expected_children -> Integer,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    log_entries,
    attributes,
    proc_stats,
    metrics,
    child_entries,
);
