use rusqlite::Connection;

/// Current schema version of the ledger database, tracked in `PRAGMA user_version`.
pub const LEDGER_SCHEMA_VERSION: i32 = 1;
/// Current schema version of the audit database.
pub const AUDIT_SCHEMA_VERSION: i32 = 1;

/// Initialize the ledger database schema (everything except activity logs)
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- Teams, fundraisers and events are owned by the surrounding product.
        -- The ledger reads them and only ever writes fundraisers.collected_amount.
        CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fundraisers (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'closed')),
            collected_amount INTEGER NOT NULL DEFAULT 0,
            collected_updated_at INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fundraisers_team ON fundraisers(team_id);

        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            currency TEXT NOT NULL,
            ticket_price INTEGER CHECK (ticket_price IS NULL OR ticket_price > 0),
            status TEXT NOT NULL DEFAULT 'on_sale' CHECK (status IN ('on_sale', 'closed', 'cancelled')),
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_team ON events(team_id);

        -- Every verified processor notification, keyed by the processor's event id.
        -- Status: received -> verified -> applied | rejected | ignored
        CREATE TABLE IF NOT EXISTS inbound_events (
            id TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            provider_event_id TEXT NOT NULL UNIQUE,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            signature TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('received', 'verified', 'applied', 'rejected', 'ignored')),
            rejection_reason TEXT,
            redelivery_count INTEGER NOT NULL DEFAULT 0,
            last_redelivered_at INTEGER,
            received_at INTEGER NOT NULL,
            processed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_inbound_events_status ON inbound_events(status, received_at DESC);

        -- Append-only payment ledger. Rows are never updated or deleted.
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            amount INTEGER NOT NULL CHECK (amount > 0),
            currency TEXT NOT NULL,
            payer_id TEXT,
            payer_email TEXT,
            target_type TEXT NOT NULL CHECK (target_type IN ('fundraiser', 'event_ticket')),
            target_id TEXT NOT NULL,
            team_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'completed' CHECK (status IN ('completed')),
            method TEXT NOT NULL,
            inbound_event_id TEXT NOT NULL UNIQUE REFERENCES inbound_events(id),
            provider_payment_ref TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payments_target ON payments(target_type, target_id, status);
        CREATE INDEX IF NOT EXISTS idx_payments_team ON payments(team_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS tickets (
            id TEXT PRIMARY KEY,
            payer_ref TEXT,
            event_id TEXT NOT NULL,
            verification_payload TEXT NOT NULL,
            payment_id TEXT NOT NULL UNIQUE REFERENCES payments(id),
            issued_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tickets_event ON tickets(event_id);

        -- Post-commit work, written atomically with its payment
        CREATE TABLE IF NOT EXISTS follow_up_tasks (
            id TEXT PRIMARY KEY,
            payment_id TEXT NOT NULL REFERENCES payments(id),
            kind TEXT NOT NULL CHECK (kind IN ('recompute_aggregate', 'issue_ticket', 'log_activity')),
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'done', 'abandoned')),
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at INTEGER NOT NULL,
            lease_expires_at INTEGER,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(payment_id, kind)
        );
        CREATE INDEX IF NOT EXISTS idx_follow_up_due ON follow_up_tasks(status, next_attempt_at);
        "#,
    )?;
    conn.pragma_update(None, "user_version", LEDGER_SCHEMA_VERSION)?;
    Ok(())
}

/// Initialize the audit database schema (separate DB file)
/// Optimized for append-only workload with WAL mode
pub fn init_audit_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 1000;
        PRAGMA journal_size_limit = 67108864;

        CREATE TABLE IF NOT EXISTS activity_logs (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            team_id TEXT NOT NULL,
            actor_type TEXT NOT NULL CHECK (actor_type IN ('public', 'system')),
            actor_ref TEXT,
            category TEXT NOT NULL CHECK (category IN ('contribution', 'ticket')),
            message TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            details TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_activity_logs_team_time ON activity_logs(team_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_activity_logs_resource ON activity_logs(resource_type, resource_id);
        CREATE INDEX IF NOT EXISTS idx_activity_logs_purge ON activity_logs(created_at);
        "#,
    )?;
    conn.pragma_update(None, "user_version", AUDIT_SCHEMA_VERSION)?;
    Ok(())
}

/// Read the schema version stamped by `init_db` / `init_audit_db`.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}
