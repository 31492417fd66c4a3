use rusqlite_migration::{M, Migrations};

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE records (
            id              TEXT PRIMARY KEY,
            entries_json    TEXT NOT NULL DEFAULT '{}',
            revision        INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        );

        -- Revisions are drawn from one counter so a deleted and recreated
        -- record never reuses an old token.
        CREATE TABLE revision_seq (
            id      INTEGER PRIMARY KEY CHECK (id = 0),
            value   INTEGER NOT NULL
        );

        INSERT INTO revision_seq (id, value) VALUES (0, 0);",
    )])
}
