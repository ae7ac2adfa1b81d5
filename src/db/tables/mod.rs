pub mod quarantine_rules;
pub mod quarantined_messages;
