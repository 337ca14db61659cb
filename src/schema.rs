// Kept in sync with the DDL in `crate::database::SCHEMA_SQL`.

diesel::table! {
    codex_entries (id) {
        id -> BigInt,
        name -> Text,
        entry_type -> Text,
        content -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    codex_embeddings (id) {
        id -> BigInt,
        entry_id -> BigInt,
        vector -> Binary,
        model_version -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::joinable!(codex_embeddings -> codex_entries (entry_id));

diesel::allow_tables_to_appear_in_same_query!(codex_entries, codex_embeddings,);
