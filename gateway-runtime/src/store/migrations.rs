//! Schema application. Runs on every open; all statements are idempotent
//! and missing columns are added in place so an old database file keeps
//! working.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let columns = table_columns(conn, table)?;
    if !columns.iter().any(|name| name == column) {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])?;
    }
    Ok(())
}

pub fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT)",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evidence_runs (
            run_id TEXT PRIMARY KEY,
            module TEXT NOT NULL,
            action TEXT NOT NULL,
            seed INTEGER NOT NULL,
            state_hash TEXT NOT NULL,
            receipt_hashes TEXT NOT NULL,
            replay_ok INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS orders (
            order_id TEXT PRIMARY KEY,
            owner_address TEXT NOT NULL DEFAULT '0x0',
            side TEXT NOT NULL,
            amount INTEGER NOT NULL,
            price INTEGER NOT NULL,
            asset_in TEXT NOT NULL,
            asset_out TEXT NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;
    add_column_if_missing(conn, "orders", "owner_address", "TEXT NOT NULL DEFAULT '0x0'")?;
    add_column_if_missing(conn, "orders", "status", "TEXT NOT NULL DEFAULT 'open'")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trades (
            trade_id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            price INTEGER NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            message_id TEXT PRIMARY KEY,
            channel TEXT NOT NULL,
            sender_account_id TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;
    add_column_if_missing(conn, "messages", "sender_account_id", "TEXT NOT NULL DEFAULT ''")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS portal_accounts (
            account_id TEXT PRIMARY KEY,
            handle TEXT UNIQUE NOT NULL,
            public_key TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            bio TEXT
        )",
        [],
    )?;
    add_column_if_missing(conn, "portal_accounts", "bio", "TEXT")?;
    add_column_if_missing(conn, "portal_accounts", "wallet_address", "TEXT")?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_portal_accounts_wallet_address
         ON portal_accounts(wallet_address)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS portal_challenges (
            account_id TEXT NOT NULL,
            nonce TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            used INTEGER NOT NULL,
            PRIMARY KEY (account_id, nonce)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS portal_sessions (
            token TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS e2ee_identities (
            account_id TEXT PRIMARY KEY,
            public_jwk TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chat_rooms (
            room_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            is_public INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chat_messages (
            message_id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            sender_account_id TEXT NOT NULL,
            body TEXT NOT NULL,
            seq INTEGER NOT NULL,
            prev_digest TEXT NOT NULL,
            msg_digest TEXT NOT NULL,
            chain_head TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS listings (
            listing_id TEXT PRIMARY KEY,
            publisher_id TEXT NOT NULL DEFAULT 'unknown',
            sku TEXT NOT NULL,
            title TEXT NOT NULL,
            price INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            run_id TEXT NOT NULL
        )",
        [],
    )?;
    add_column_if_missing(conn, "listings", "publisher_id", "TEXT NOT NULL DEFAULT 'unknown'")?;
    add_column_if_missing(conn, "listings", "status", "TEXT NOT NULL DEFAULT 'active'")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS purchases (
            purchase_id TEXT PRIMARY KEY,
            listing_id TEXT NOT NULL,
            buyer_id TEXT NOT NULL DEFAULT 'unknown',
            qty INTEGER NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;
    add_column_if_missing(conn, "purchases", "buyer_id", "TEXT NOT NULL DEFAULT 'unknown'")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS receipts (
            receipt_id TEXT PRIMARY KEY,
            module TEXT NOT NULL,
            action TEXT NOT NULL,
            state_hash TEXT NOT NULL,
            receipt_hashes TEXT NOT NULL,
            replay_ok INTEGER NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_ledger (
            fee_id TEXT PRIMARY KEY,
            module TEXT NOT NULL,
            action TEXT NOT NULL,
            protocol_fee_total INTEGER NOT NULL,
            platform_fee_amount INTEGER NOT NULL,
            total_paid INTEGER NOT NULL,
            fee_address TEXT NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS wallet_accounts (
            address TEXT NOT NULL,
            asset_id TEXT NOT NULL DEFAULT 'NYXT',
            balance INTEGER NOT NULL,
            PRIMARY KEY (address, asset_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS wallet_transfers (
            transfer_id TEXT PRIMARY KEY,
            from_address TEXT NOT NULL,
            to_address TEXT NOT NULL,
            asset_id TEXT NOT NULL DEFAULT 'NYXT',
            amount INTEGER NOT NULL,
            fee_total INTEGER NOT NULL,
            treasury_address TEXT NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;
    add_column_if_missing(conn, "wallet_transfers", "asset_id", "TEXT NOT NULL DEFAULT 'NYXT'")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faucet_claims (
            claim_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            address TEXT NOT NULL,
            asset_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            ip TEXT NOT NULL DEFAULT 'unknown',
            created_at INTEGER NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS airdrop_claims (
            claim_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            task_id TEXT NOT NULL,
            reward INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            UNIQUE (account_id, task_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS entertainment_items (
            item_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            summary TEXT NOT NULL,
            category TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS entertainment_events (
            event_id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            mode TEXT NOT NULL,
            step INTEGER NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS web2_guard_requests (
            request_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            url TEXT NOT NULL,
            method TEXT NOT NULL,
            request_hash TEXT NOT NULL,
            response_hash TEXT NOT NULL,
            response_status INTEGER NOT NULL,
            response_size INTEGER NOT NULL,
            response_truncated INTEGER NOT NULL,
            body_size INTEGER NOT NULL,
            header_names TEXT NOT NULL,
            sealed_request TEXT,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}
