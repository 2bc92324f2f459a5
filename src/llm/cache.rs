//! Optional reply cache for repeated questions.
//!
//! Keyed by a SHA-256 of the provider preference and the full message list.
//! A TTL of zero disables the cache entirely.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use super::gateway::GatewayReply;
use super::{ChatMessage, ProviderPreference};

/// Longest TTL honoured; larger settings are capped
const MAX_TTL_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
struct CachedReply {
    reply: GatewayReply,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CachedReply>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(
                i64::try_from(ttl_secs)
                    .unwrap_or(MAX_TTL_SECS)
                    .min(MAX_TTL_SECS),
            ),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl > Duration::zero()
    }

    pub fn key(messages: &[ChatMessage], preference: ProviderPreference) -> String {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        // Length-prefixed so no content can mimic a message boundary
        field(preference.to_string().as_bytes());
        for message in messages {
            field(message.role.as_str().as_bytes());
            field(message.content.as_bytes());
        }

        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<GatewayReply> {
        if !self.is_enabled() {
            return None;
        }

        let hit = self.entries.get(key).map(|e| e.value().clone())?;
        if hit.expires_at <= now {
            // A concurrent insert may have refreshed the entry since the read
            self.entries.remove_if(key, |_, cached| cached.expires_at <= now);
            return None;
        }
        Some(hit.reply)
    }

    pub fn insert(&self, key: String, reply: GatewayReply, now: DateTime<Utc>) {
        if !self.is_enabled() {
            return;
        }

        self.entries.insert(
            key,
            CachedReply {
                reply,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
