//! Per-channel pairing lifecycle, brute-force lockout, allowlisting, and
//! context-policy attenuation for messages arriving over external channels.
//!
//! Concurrency discipline follows `operator/src/policy.rs`'s "serialize
//! mutating checks, then decide" shape: every pairing attempt against a
//! given channel runs under that channel's own `tokio::sync::Mutex<()>` in
//! a `DashMap`, so a flood of concurrent guesses against one channel can't
//! race the attempts counter (check-then-increment under the same lock that
//! read it, never two independent read-then-write passes).

use crate::pairing;
use cowork_core::{ChannelConfig, ChannelContext, ChannelId, Error, LockoutTracker, PairingRecord, Result, Workspace};
use cowork_policy::{PolicyContext, PolicyManager};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Wrong-code attempts tolerated before a channel is temporarily banned.
const MAX_ATTEMPTS: u32 = 5;
/// How long a channel stays banned after crossing [`MAX_ATTEMPTS`].
const BAN_MINUTES: i64 = 15;
/// How long an issued pairing code remains valid.
const PAIRING_TTL_MINUTES: i64 = 10;

pub struct ChannelSecurity {
    channels: DashMap<ChannelId, ChannelConfig>,
    pairings: DashMap<ChannelId, PairingRecord>,
    locks: DashMap<ChannelId, Arc<Mutex<()>>>,
    lockout: LockoutTracker<ChannelId>,
}

impl Default for ChannelSecurity {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelSecurity {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            pairings: DashMap::new(),
            locks: DashMap::new(),
            lockout: LockoutTracker::new(MAX_ATTEMPTS, chrono::Duration::minutes(BAN_MINUTES)),
        }
    }

    fn lock_for(&self, channel_id: &ChannelId) -> Arc<Mutex<()>> {
        self.locks.entry(channel_id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Register (or re-register) a channel's configuration. Does not affect
    /// its pairing state.
    pub fn register_channel(&self, config: ChannelConfig) {
        self.channels.insert(config.id.clone(), config);
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Option<ChannelConfig> {
        self.channels.get(channel_id).map(|e| e.clone())
    }

    pub fn is_allowlisted(&self, channel_id: &ChannelId) -> bool {
        self.channels.get(channel_id).map(|c| c.allowlisted).unwrap_or(false)
    }

    pub fn list(&self) -> Vec<ChannelConfig> {
        self.channels.iter().map(|e| e.clone()).collect()
    }

    /// Issue a fresh pairing code for `channel_id`, replacing any prior
    /// unconfirmed pairing. Returns the plaintext code — the only time it
    /// ever exists outside the channel's own display.
    pub async fn begin_pairing(&self, channel_id: &ChannelId) -> Result<String> {
        let guard = self.lock_for(channel_id);
        let _permit = guard.lock().await;

        if let Some(remaining) = self.lockout.banned_for(channel_id) {
            return Err(Error::auth_failed(format!("channel banned for {} more seconds", remaining.num_seconds().max(0))));
        }

        let code = pairing::generate_code();
        let now = chrono::Utc::now();
        self.pairings.insert(
            channel_id.clone(),
            PairingRecord {
                channel_id: channel_id.clone(),
                code_hash: pairing::hash_code(&code),
                attempts: 0,
                created_at: now,
                expires_at: now + chrono::Duration::minutes(PAIRING_TTL_MINUTES),
                banned_until: None,
            },
        );
        info!(channel_id = %channel_id, "pairing code issued");
        Ok(code)
    }

    /// Verify a submitted pairing code. On success the channel is marked
    /// allowlisted and the lockout record cleared. On failure the attempt
    /// is counted and, past [`MAX_ATTEMPTS`], the channel is banned.
    pub async fn confirm_pairing(&self, channel_id: &ChannelId, code: &str) -> Result<()> {
        let guard = self.lock_for(channel_id);
        let _permit = guard.lock().await;

        if let Some(remaining) = self.lockout.banned_for(channel_id) {
            return Err(Error::auth_failed(format!("channel banned for {} more seconds", remaining.num_seconds().max(0))));
        }

        let mut record = self
            .pairings
            .get_mut(channel_id)
            .ok_or_else(|| Error::auth_failed("no pairing in progress for this channel"))?;

        if record.expires_at < chrono::Utc::now() {
            return Err(Error::auth_failed("pairing code expired"));
        }

        if pairing::verify_code(code, &record.code_hash) {
            drop(record);
            self.pairings.remove(channel_id);
            self.lockout.reset(channel_id);
            self.channels.entry(channel_id.clone()).and_modify(|c| c.allowlisted = true).or_insert_with(|| ChannelConfig {
                id: channel_id.clone(),
                kind: "unknown".to_string(),
                context: ChannelContext::Private,
                allowlisted: true,
                workspace_id: None,
            });
            info!(channel_id = %channel_id, "pairing confirmed");
            Ok(())
        } else {
            record.attempts += 1;
            let banned_now = self.lockout.record_failure(channel_id);
            if banned_now {
                warn!(channel_id = %channel_id, "channel banned after repeated failed pairing attempts");
            }
            Err(Error::auth_failed("incorrect pairing code"))
        }
    }

    /// Build the [`PolicyContext`] a message arriving on this channel should
    /// be evaluated under, attenuated by the channel's configured context
    /// (Private/Group/Public) so layer 3 of the Policy Manager applies the
    /// same deny-wins combinator as every other layer.
    pub fn policy_context_for<'a>(&self, channel_id: &ChannelId, workspace: &'a Workspace) -> PolicyContext<'a> {
        let context = self.channel(channel_id).map(|c| c.context);
        PolicyContext { workspace, channel_context: context }
    }

    /// Convenience wrapper combining the allowlist gate with the per-tool
    /// policy decision for a message arriving on `channel_id`.
    pub fn decide(
        &self,
        channel_id: &ChannelId,
        tool: &str,
        input: &serde_json::Value,
        policy: &PolicyManager,
        workspace: &Workspace,
    ) -> cowork_policy::PolicyDecision {
        if !self.is_allowlisted(channel_id) {
            return cowork_policy::PolicyDecision::Deny("channel is not paired".to_string());
        }
        let ctx = self.policy_context_for(channel_id, workspace);
        policy.decide(tool, input, &ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowork_core::WorkspaceId;
    use cowork_policy::{PolicyConfig, PolicyManager};
    use std::path::PathBuf;

    fn workspace() -> Workspace {
        let now = chrono::Utc::now();
        Workspace {
            id: WorkspaceId::new("w1"),
            name: "demo".into(),
            path: PathBuf::from("/workspace"),
            allowed_paths: vec![],
            network_allowed: false,
            created_at: now,
            last_used_at: now,
        }
    }

    #[tokio::test]
    async fn successful_pairing_allowlists_channel() {
        let sec = ChannelSecurity::new();
        let id = ChannelId::new("c1");
        let code = sec.begin_pairing(&id).await.unwrap();
        assert!(!sec.is_allowlisted(&id));
        sec.confirm_pairing(&id, &code).await.unwrap();
        assert!(sec.is_allowlisted(&id));
    }

    #[tokio::test]
    async fn wrong_code_does_not_allowlist() {
        let sec = ChannelSecurity::new();
        let id = ChannelId::new("c1");
        sec.begin_pairing(&id).await.unwrap();
        assert!(sec.confirm_pairing(&id, "WRONG1").await.is_err());
        assert!(!sec.is_allowlisted(&id));
    }

    #[tokio::test]
    async fn repeated_failures_ban_the_channel() {
        let sec = ChannelSecurity::new();
        let id = ChannelId::new("c1");
        let code = sec.begin_pairing(&id).await.unwrap();
        for _ in 0..MAX_ATTEMPTS {
            let _ = sec.confirm_pairing(&id, "WRONG1").await;
        }
        let err = sec.confirm_pairing(&id, &code).await.unwrap_err();
        assert!(err.to_string().contains("banned"));
    }

    #[tokio::test]
    async fn unpaired_channel_is_denied() {
        let sec = ChannelSecurity::new();
        let ws = workspace();
        let policy = PolicyManager::new(PolicyConfig::default());
        let decision = sec.decide(&ChannelId::new("unknown"), "read", &serde_json::json!({}), &policy, &ws);
        assert!(matches!(decision, cowork_policy::PolicyDecision::Deny(_)));
    }

    #[tokio::test]
    async fn paired_public_channel_attenuates_to_read_only() {
        let sec = ChannelSecurity::new();
        let ws = workspace();
        let id = ChannelId::new("c1");
        sec.register_channel(ChannelConfig {
            id: id.clone(),
            kind: "sms".into(),
            context: ChannelContext::Public,
            allowlisted: true,
            workspace_id: Some(ws.id.clone()),
        });
        let policy = PolicyManager::new(PolicyConfig::default());
        let input = serde_json::json!({"file_path": "/workspace/a.txt", "content": "x"});
        let decision = sec.decide(&id, "write", &input, &policy, &ws);
        assert!(matches!(decision, cowork_policy::PolicyDecision::Deny(_)));
    }
}
