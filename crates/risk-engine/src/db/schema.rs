// crates/risk-engine/src/db/schema.rs
// Relational schema for the entities in §3: Repository, Commit, Developer,
// File, CodeBlock (and its derived properties), CodeBlockChange,
// FunctionIdentityMap, CodeBlockCoupling, CodeBlockIncident, and the
// externally-ingested Issue/PullRequest/TimelineEvent shapes joined against
// for ownership/incident/timeline queries.

use super::migration_helpers::create_table_if_missing;
use rusqlite::{Connection, Result};

pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    create_repositories_table(conn)?;
    create_developers_table(conn)?;
    create_commits_table(conn)?;
    create_files_table(conn)?;
    create_code_blocks_table(conn)?;
    create_code_block_changes_table(conn)?;
    create_function_identity_map_table(conn)?;
    create_code_block_coupling_table(conn)?;
    create_code_block_incidents_table(conn)?;
    create_issues_table(conn)?;
    create_pull_requests_table(conn)?;
    create_timeline_events_table(conn)?;
    create_import_events_table(conn)?;
    Ok(())
}

fn create_repositories_table(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "repositories",
        "CREATE TABLE repositories (
            id    TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            name  TEXT NOT NULL,
            UNIQUE(owner, name)
        )",
    )
}

fn create_developers_table(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "developers",
        "CREATE TABLE developers (
            email TEXT PRIMARY KEY,
            name  TEXT
        )",
    )
}

fn create_commits_table(conn: &Connection) -> Result<()> {
    // Commit.sha is globally unique per I1 ("A Commit is uniquely identified
    // by sha within a Repository"); scoped by repo_id since the same sha
    // could in principle recur across two independently-ingested repos.
    create_table_if_missing(
        conn,
        "commits",
        "CREATE TABLE commits (
            repo_id        TEXT NOT NULL REFERENCES repositories(id),
            sha            TEXT NOT NULL,
            message        TEXT NOT NULL,
            author_email   TEXT NOT NULL REFERENCES developers(email),
            authored_at    TEXT NOT NULL,
            additions      INTEGER NOT NULL DEFAULT 0,
            deletions      INTEGER NOT NULL DEFAULT 0,
            atomized       INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (repo_id, sha)
        )",
    )
}

fn create_files_table(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "files",
        "CREATE TABLE files (
            repo_id TEXT NOT NULL REFERENCES repositories(id),
            path    TEXT NOT NULL,
            PRIMARY KEY (repo_id, path)
        )",
    )
}

fn create_code_blocks_table(conn: &Connection) -> Result<()> {
    // CodeBlock.id = "{repo_id}:codeblock:{file_path}:{name}" (§3 natural
    // key) — derived properties (ownership/staleness/coupling/incidents)
    // are columns refreshed in place by the calculators (L9-L11), never
    // separately versioned.
    // `current_status` is modeled as the `deleted` flag: the specification
    // never exercises a status beyond {active, deleted}, so a boolean plus
    // an index on it serves the same queries as a status enum would.
    create_table_if_missing(
        conn,
        "code_blocks",
        "CREATE TABLE code_blocks (
            id                     TEXT PRIMARY KEY,
            repo_id                TEXT NOT NULL REFERENCES repositories(id),
            file_path              TEXT NOT NULL,
            canonical_file_path    TEXT NOT NULL,
            path_at_creation       TEXT NOT NULL,
            name                   TEXT NOT NULL,
            block_type             TEXT NOT NULL,
            language                TEXT,
            start_line             INTEGER NOT NULL,
            end_line               INTEGER NOT NULL,
            signature              TEXT NOT NULL,
            historical_block_names TEXT NOT NULL DEFAULT '[]',
            first_seen_sha         TEXT NOT NULL,
            last_modified_commit   TEXT,
            deleted                INTEGER NOT NULL DEFAULT 0,
            original_author        TEXT REFERENCES developers(email),
            last_modifier          TEXT REFERENCES developers(email),
            staleness_days         INTEGER,
            familiarity_map        TEXT NOT NULL DEFAULT '[]',
            incident_count         INTEGER NOT NULL DEFAULT 0,
            last_incident_date     TEXT,
            temporal_summary       TEXT,
            co_change_count        INTEGER NOT NULL DEFAULT 0,
            avg_coupling_rate      REAL NOT NULL DEFAULT 0.0,
            risk_score             REAL,
            ownership_indexed_at   TEXT,
            coupling_indexed_at    TEXT,
            UNIQUE(repo_id, canonical_file_path, name)
        )",
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_code_blocks_repo_file
            ON code_blocks(repo_id, file_path);
         CREATE INDEX IF NOT EXISTS idx_code_blocks_repo_deleted
            ON code_blocks(repo_id, deleted);",
    )
}

fn create_code_block_changes_table(conn: &Connection) -> Result<()> {
    // Idempotency (I2): a given (code_block_id, commit_sha) pair is
    // recorded at most once; replays of the same commit DO NOTHING.
    create_table_if_missing(
        conn,
        "code_block_changes",
        "CREATE TABLE code_block_changes (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id       TEXT NOT NULL REFERENCES repositories(id),
            code_block_id TEXT NOT NULL REFERENCES code_blocks(id),
            commit_sha    TEXT NOT NULL,
            behavior      TEXT NOT NULL,
            old_signature TEXT,
            new_signature TEXT,
            lines_added   INTEGER NOT NULL DEFAULT 0,
            lines_removed INTEGER NOT NULL DEFAULT 0,
            changed_at    TEXT NOT NULL,
            UNIQUE(repo_id, code_block_id, commit_sha)
        )",
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_code_block_changes_block
            ON code_block_changes(code_block_id, changed_at);",
    )
}

fn create_function_identity_map_table(conn: &Connection) -> Result<()> {
    // Tracks the state tracker's (file_path, block_name) -> block_id
    // resolution across renames so history survives a RENAME event (§4.5).
    // `signature`/`commit_sha`/`rename_date` make this the append-in-spirit
    // ledger §3 describes ("FunctionIdentityMap ... enabling 'follow'
    // queries"); the primary key is kept on the lookup triple since a given
    // (file, name) resolves to exactly one current block_id at a time.
    create_table_if_missing(
        conn,
        "function_identity_map",
        "CREATE TABLE function_identity_map (
            repo_id       TEXT NOT NULL REFERENCES repositories(id),
            file_path     TEXT NOT NULL,
            block_name    TEXT NOT NULL,
            code_block_id TEXT NOT NULL REFERENCES code_blocks(id),
            signature     TEXT NOT NULL DEFAULT '',
            commit_sha    TEXT NOT NULL DEFAULT '',
            rename_date   TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (repo_id, file_path, block_name)
        )",
    )
}

fn create_code_block_coupling_table(conn: &Connection) -> Result<()> {
    // Undirected pair, canonicalized so (a,b) and (b,a) collapse to one row
    // (I3/I4); persisted only when co_change_rate clears the configured
    // threshold.
    create_table_if_missing(
        conn,
        "code_block_coupling",
        "CREATE TABLE code_block_coupling (
            repo_id          TEXT NOT NULL REFERENCES repositories(id),
            block_a_id       TEXT NOT NULL REFERENCES code_blocks(id),
            block_b_id       TEXT NOT NULL REFERENCES code_blocks(id),
            co_change_count  INTEGER NOT NULL,
            co_change_rate   REAL NOT NULL,
            rationale        TEXT,
            updated_at       TEXT NOT NULL,
            PRIMARY KEY (repo_id, block_a_id, block_b_id),
            CHECK (block_a_id < block_b_id)
        )",
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_coupling_block_b
            ON code_block_coupling(block_b_id);",
    )
}

fn create_code_block_incidents_table(conn: &Connection) -> Result<()> {
    // Confidence is pinned by evidence_source per I5: commit_close = 0.85,
    // commit_reference = 0.75, timeline_event (catch-all) = 0.80.
    create_table_if_missing(
        conn,
        "code_block_incidents",
        "CREATE TABLE code_block_incidents (
            repo_id         TEXT NOT NULL REFERENCES repositories(id),
            code_block_id   TEXT NOT NULL REFERENCES code_blocks(id),
            issue_number    INTEGER NOT NULL,
            confidence      REAL NOT NULL,
            evidence_source TEXT NOT NULL,
            commit_sha      TEXT NOT NULL,
            incident_date   TEXT NOT NULL,
            resolution_date TEXT,
            incident_type   TEXT NOT NULL DEFAULT 'unknown',
            evidence_text   TEXT NOT NULL DEFAULT '',
            linked_at       TEXT NOT NULL,
            PRIMARY KEY (repo_id, code_block_id, issue_number),
            CHECK (confidence >= 0.70)
        )",
    )
}

fn create_issues_table(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "issues",
        "CREATE TABLE issues (
            repo_id    TEXT NOT NULL REFERENCES repositories(id),
            number     INTEGER NOT NULL,
            title      TEXT NOT NULL,
            labels     TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            closed_at  TEXT,
            PRIMARY KEY (repo_id, number)
        )",
    )
}

fn create_pull_requests_table(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "pull_requests",
        "CREATE TABLE pull_requests (
            repo_id   TEXT NOT NULL REFERENCES repositories(id),
            number    INTEGER NOT NULL,
            title     TEXT NOT NULL,
            merged_at TEXT,
            PRIMARY KEY (repo_id, number)
        )",
    )
}

fn create_timeline_events_table(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "timeline_events",
        "CREATE TABLE timeline_events (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id      TEXT NOT NULL REFERENCES repositories(id),
            issue_number INTEGER NOT NULL,
            event_type   TEXT NOT NULL,
            source_sha   TEXT,
            created_at   TEXT NOT NULL
        )",
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_timeline_events_issue
            ON timeline_events(repo_id, issue_number);
         CREATE INDEX IF NOT EXISTS idx_timeline_events_sha
            ON timeline_events(repo_id, source_sha);",
    )
}

fn create_import_events_table(conn: &Connection) -> Result<()> {
    // ADD_IMPORT/REMOVE_IMPORT events (§9): accepted but not resolved to a
    // block-level edge, so they carry no code_block_id FK. Persisted here
    // rather than in code_block_changes so the change log still records
    // them per §9's "requires only that the events be persisted".
    create_table_if_missing(
        conn,
        "import_events",
        "CREATE TABLE import_events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id         TEXT NOT NULL REFERENCES repositories(id),
            file_path       TEXT NOT NULL,
            commit_sha      TEXT NOT NULL,
            behavior        TEXT NOT NULL,
            dependency_path TEXT,
            changed_at      TEXT NOT NULL,
            UNIQUE(repo_id, file_path, commit_sha, behavior, dependency_path)
        )",
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_import_events_file
            ON import_events(repo_id, file_path);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_run_all_migrations_is_idempotent() {
        let conn = test_conn();
        run_all_migrations(&conn).unwrap();
        run_all_migrations(&conn).unwrap();

        let table_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='code_blocks'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(table_count, 1);
    }

    #[test]
    fn test_code_block_unique_natural_key() {
        let conn = test_conn();
        run_all_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO repositories (id, owner, name) VALUES ('r1','acme','widgets')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO code_blocks
                (id, repo_id, file_path, canonical_file_path, path_at_creation, name,
                 block_type, start_line, end_line, signature, first_seen_sha)
             VALUES ('r1:codeblock:a.rs:foo', 'r1', 'a.rs', 'a.rs', 'a.rs', 'foo',
                     'function', 1, 10, 'fn foo()', 'sha1')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO code_blocks
                (id, repo_id, file_path, canonical_file_path, path_at_creation, name,
                 block_type, start_line, end_line, signature, first_seen_sha)
             VALUES ('other-id', 'r1', 'a.rs', 'a.rs', 'a.rs', 'foo',
                     'function', 1, 10, 'fn foo()', 'sha1')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_coupling_canonical_ordering_enforced() {
        let conn = test_conn();
        run_all_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO repositories (id, owner, name) VALUES ('r1','acme','widgets')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO code_blocks
                (id, repo_id, file_path, canonical_file_path, path_at_creation, name,
                 block_type, start_line, end_line, signature, first_seen_sha)
             VALUES ('b', 'r1', 'a.rs', 'a.rs', 'a.rs', 'b', 'function', 1, 2, 'x', 'sha1')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO code_blocks
                (id, repo_id, file_path, canonical_file_path, path_at_creation, name,
                 block_type, start_line, end_line, signature, first_seen_sha)
             VALUES ('a', 'r1', 'a.rs', 'a.rs', 'a.rs', 'a', 'function', 1, 2, 'x', 'sha1')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO code_block_coupling (repo_id, block_a_id, block_b_id, co_change_count, co_change_rate, updated_at)
             VALUES ('r1', 'b', 'a', 3, 0.6, '2026-01-01')",
            [],
        );
        assert!(result.is_err(), "block_a_id must sort before block_b_id");
    }
}
