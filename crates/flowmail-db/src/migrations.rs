use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub const CURRENT_VERSION: i64 = 1;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (campaigns, results, accounts, templates)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE campaigns (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL,
                subject                 TEXT NOT NULL,
                html_content            TEXT NOT NULL DEFAULT '',
                flow_account            TEXT NOT NULL,
                recipients              TEXT NOT NULL,
                delay_between_emails    INTEGER NOT NULL DEFAULT 1,
                batch_size              INTEGER NOT NULL DEFAULT 25,
                status                  TEXT NOT NULL DEFAULT 'draft'
                    CHECK (status IN ('draft', 'running', 'paused', 'completed', 'stopped')),
                processed_count         INTEGER NOT NULL DEFAULT 0,
                success_count           INTEGER NOT NULL DEFAULT 0,
                failed_count            INTEGER NOT NULL DEFAULT 0,
                created_at              TEXT NOT NULL
            );

            CREATE INDEX idx_campaigns_status ON campaigns(status);
            CREATE INDEX idx_campaigns_account ON campaigns(flow_account);

            CREATE TABLE email_results (
                id          TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                email       TEXT NOT NULL,
                status      TEXT NOT NULL CHECK (status IN ('success', 'failed')),
                response    TEXT NOT NULL DEFAULT '',
                timestamp   TEXT NOT NULL
            );

            CREATE INDEX idx_email_results_campaign ON email_results(campaign_id);

            CREATE TABLE flow_accounts (
                name    TEXT PRIMARY KEY,
                url     TEXT NOT NULL
            );

            CREATE TABLE email_templates (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL,
                subject                 TEXT NOT NULL DEFAULT '',
                html_content            TEXT NOT NULL DEFAULT '',
                flow_account            TEXT NOT NULL DEFAULT '',
                delay_between_emails    INTEGER NOT NULL DEFAULT 1,
                batch_size              INTEGER NOT NULL DEFAULT 25
            );

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database schema at v{}", CURRENT_VERSION);
    Ok(())
}
