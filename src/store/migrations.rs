pub const BASE_MIGRATION: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS signatures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL,
    postal_code TEXT NOT NULL DEFAULT '',
    consent_petition INTEGER NOT NULL DEFAULT 0,
    consent_updates INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_signatures_consent
    ON signatures(consent_petition, consent_updates);

CREATE TABLE IF NOT EXISTS pledges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signature_id INTEGER NOT NULL REFERENCES signatures(id),
    amount INTEGER NOT NULL CHECK (amount >= 0),
    pledge_tier TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pledges_signature
    ON pledges(signature_id);

CREATE TABLE IF NOT EXISTS campaign_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    signature_goal INTEGER NOT NULL,
    pledge_goal INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS email_campaigns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject TEXT NOT NULL,
    audience_filter TEXT NOT NULL,
    recipients_count INTEGER NOT NULL,
    sent_count INTEGER NOT NULL,
    failed_count INTEGER NOT NULL,
    sent_at TEXT NOT NULL
);
"#;
