//! Device-token bookkeeping for release announcements and the admin-only
//! publish path that fans a message out to every registered device.

use crate::cache::write_atomic;
use crate::model::unix_millis;
use anyhow::{Context, Result, anyhow, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MAX_TOKENS_PER_BATCH: usize = 500;

static RE_DEVICE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_:\-]{20,4096}$").unwrap());

/// Delivery errors after which a token will never work again.
const PERMANENT_FAILURES: [&str; 3] = ["not-registered", "invalid-registration", "invalid-argument"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub registered_at: u64,
    pub last_seen: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutcome {
    pub token: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl TokenOutcome {
    pub fn is_permanent_failure(&self) -> bool {
        !self.success
            && self
                .error
                .as_deref()
                .map(|code| PERMANENT_FAILURES.iter().any(|marker| code.contains(marker)))
                .unwrap_or(false)
    }
}

pub fn validate_token(token: &str) -> Result<()> {
    if !RE_DEVICE_TOKEN.is_match(token) {
        bail!("device token is malformed");
    }
    Ok(())
}

/// Registered device tokens persisted as one JSON file.
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    entries: Vec<TokenEntry>,
}

impl TokenStore {
    pub fn open(path: &Path) -> Result<Self> {
        let entries = match fs::read_to_string(path) {
            Ok(data) => {
                let file: TokenFile = serde_json::from_str(&data)
                    .with_context(|| format!("Parsing {}", path.display()))?;
                file.tokens
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err).with_context(|| format!("Reading {}", path.display())),
        };
        debug!(path = %path.display(), count = entries.len(), "Opened token store");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn entries(&self) -> &[TokenEntry] {
        &self.entries
    }

    pub fn tokens(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.token.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` when the token was not known before. Known tokens get
    /// their `last_seen` refreshed.
    pub fn register(&mut self, token: &str) -> Result<bool> {
        let token = token.trim();
        validate_token(token)?;
        let now = unix_millis();
        let added = match self.entries.iter_mut().find(|entry| entry.token == token) {
            Some(entry) => {
                entry.last_seen = now;
                false
            }
            None => {
                self.entries.push(TokenEntry {
                    token: token.to_string(),
                    registered_at: now,
                    last_seen: now,
                });
                true
            }
        };
        self.persist()?;
        info!(added, total = self.entries.len(), "Registered device token");
        Ok(added)
    }

    pub fn unregister(&mut self, token: &str) -> Result<bool> {
        let token = token.trim();
        let before = self.entries.len();
        self.entries.retain(|entry| entry.token != token);
        let removed = self.entries.len() != before;
        if removed {
            self.persist()?;
            info!(total = self.entries.len(), "Unregistered device token");
        }
        Ok(removed)
    }

    /// Drop tokens whose delivery failed permanently; returns how many went.
    pub fn prune(&mut self, outcomes: &[TokenOutcome]) -> Result<usize> {
        let dead: Vec<&str> = outcomes
            .iter()
            .filter(|outcome| outcome.is_permanent_failure())
            .map(|outcome| outcome.token.as_str())
            .collect();
        if dead.is_empty() {
            return Ok(0);
        }
        let before = self.entries.len();
        self.entries
            .retain(|entry| !dead.contains(&entry.token.as_str()));
        let pruned = before - self.entries.len();
        if pruned > 0 {
            self.persist()?;
            info!(pruned, "Pruned undeliverable device tokens");
        }
        Ok(pruned)
    }

    /// Drop tokens not seen for longer than `max_age`.
    pub fn prune_stale(&mut self, max_age: Duration) -> Result<usize> {
        self.prune_stale_at(unix_millis(), max_age)
    }

    fn prune_stale_at(&mut self, now_millis: u64, max_age: Duration) -> Result<usize> {
        let cutoff = now_millis.saturating_sub(max_age.as_millis() as u64);
        let before = self.entries.len();
        self.entries.retain(|entry| entry.last_seen >= cutoff);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            self.persist()?;
            info!(pruned, "Pruned stale device tokens");
        }
        Ok(pruned)
    }

    fn persist(&self) -> Result<()> {
        let file = TokenFile {
            tokens: self.entries.clone(),
        };
        let data = serde_json::to_vec_pretty(&file).context("Serializing token store")?;
        write_atomic(&self.path, &data)
            .with_context(|| format!("Writing {}", self.path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

pub trait PushMessenger {
    /// Deliver one batch; outcomes are reported per token.
    fn send(&self, tokens: &[String], payload: &NotificationPayload) -> Result<Vec<TokenOutcome>>;
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    tokens: &'a [String],
    notification: PushNotification<'a>,
    data: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct PushNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    responses: Vec<PushResult>,
}

#[derive(Debug, Deserialize)]
struct PushResult {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Messenger that POSTs batches to an HTTP push gateway.
pub struct HttpPushMessenger {
    endpoint: String,
    server_key: Option<String>,
    http: reqwest::blocking::Client,
}

impl HttpPushMessenger {
    pub fn new(endpoint: impl Into<String>, server_key: Option<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Building push HTTP client")?;
        Ok(Self {
            endpoint: endpoint.into(),
            server_key,
            http,
        })
    }
}

impl PushMessenger for HttpPushMessenger {
    fn send(&self, tokens: &[String], payload: &NotificationPayload) -> Result<Vec<TokenOutcome>> {
        let request = PushRequest {
            tokens,
            notification: PushNotification {
                title: &payload.title,
                body: &payload.body,
            },
            data: &payload.data,
        };
        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.server_key {
            builder = builder.bearer_auth(key);
        }
        let response: PushResponse = builder
            .send()
            .with_context(|| format!("Posting to {}", self.endpoint))?
            .error_for_status()
            .context("Push gateway rejected the batch")?
            .json()
            .context("Decoding push gateway response")?;
        zip_outcomes(tokens, response.responses)
    }
}

fn zip_outcomes(tokens: &[String], results: Vec<PushResult>) -> Result<Vec<TokenOutcome>> {
    if results.len() != tokens.len() {
        bail!(
            "push gateway returned {} results for {} tokens",
            results.len(),
            tokens.len()
        );
    }
    Ok(tokens
        .iter()
        .zip(results)
        .map(|(token, result)| TokenOutcome {
            token: token.clone(),
            success: result.success,
            error: result.error,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pruned: usize,
}

pub struct AdminNotifier {
    store: TokenStore,
    messenger: Box<dyn PushMessenger>,
    admin_key_sha256: Option<String>,
}

impl AdminNotifier {
    pub fn new(
        store: TokenStore,
        messenger: Box<dyn PushMessenger>,
        admin_key_sha256: Option<String>,
    ) -> Self {
        Self {
            store,
            messenger,
            admin_key_sha256,
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Send `payload` to every registered token. Failed batches are counted
    /// and not retried.
    pub fn publish(&mut self, admin_key: &str, payload: &NotificationPayload) -> Result<PublishReport> {
        self.authorize(admin_key)?;
        if payload.title.trim().is_empty() || payload.body.trim().is_empty() {
            bail!("notification title and body must not be empty");
        }

        let tokens = self.store.tokens();
        let mut report = PublishReport {
            attempted: tokens.len(),
            ..PublishReport::default()
        };
        if tokens.is_empty() {
            info!("No registered devices; nothing to publish");
            return Ok(report);
        }

        let mut outcomes = Vec::with_capacity(tokens.len());
        for (batch_idx, batch) in tokens.chunks(MAX_TOKENS_PER_BATCH).enumerate() {
            match self.messenger.send(batch, payload) {
                Ok(batch_outcomes) => {
                    let ok = batch_outcomes.iter().filter(|o| o.success).count();
                    report.succeeded += ok;
                    report.failed += batch_outcomes.len() - ok;
                    debug!(batch_idx, size = batch.len(), ok, "Delivered notification batch");
                    outcomes.extend(batch_outcomes);
                }
                Err(err) => {
                    warn!(batch_idx, size = batch.len(), "Notification batch failed: {err:#}");
                    report.failed += batch.len();
                }
            }
        }
        report.pruned = self.store.prune(&outcomes)?;
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            pruned = report.pruned,
            "Published notification"
        );
        Ok(report)
    }

    fn authorize(&self, admin_key: &str) -> Result<()> {
        let expected = self
            .admin_key_sha256
            .as_deref()
            .ok_or_else(|| anyhow!("publishing is disabled; no admin key digest configured"))?;
        let digest = format!("{:x}", Sha256::digest(admin_key.as_bytes()));
        if !digests_match(&digest, &expected.trim().to_ascii_lowercase()) {
            warn!("Rejected publish attempt with a wrong admin key");
            bail!("unauthorized");
        }
        Ok(())
    }
}

fn digests_match(left: &str, right: &str) -> bool {
    left.len() == right.len()
        && left
            .bytes()
            .zip(right.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::unique_temp_dir;
    use std::sync::{Arc, Mutex};

    const TOKEN_A: &str = "dA1b2C3d4E5f6G7h8I9j:APA91bHPRgkF";
    const TOKEN_B: &str = "eB2c3D4e5F6g7H8i9J0k:APA91bXqLmNo";
    const TOKEN_C: &str = "fC3d4E5f6G7h8I9j0K1l:APA91bZzYyXx";

    #[derive(Clone, Default)]
    struct RecordingMessenger {
        batches: Arc<Mutex<Vec<usize>>>,
        dead: Vec<String>,
        fail_transport: bool,
    }

    impl PushMessenger for RecordingMessenger {
        fn send(&self, tokens: &[String], _payload: &NotificationPayload) -> Result<Vec<TokenOutcome>> {
            self.batches.lock().expect("lock").push(tokens.len());
            if self.fail_transport {
                bail!("gateway unreachable");
            }
            Ok(tokens
                .iter()
                .map(|token| {
                    let dead = self.dead.contains(token);
                    TokenOutcome {
                        token: token.clone(),
                        success: !dead,
                        error: dead.then(|| "messaging/registration-token-not-registered".to_string()),
                    }
                })
                .collect())
        }
    }

    fn payload() -> NotificationPayload {
        NotificationPayload {
            title: "New tafsir".to_string(),
            body: "Surah Al-Mulk is now available".to_string(),
            data: BTreeMap::from([("chapter_id".to_string(), "67".to_string())]),
        }
    }

    fn digest(key: &str) -> String {
        format!("{:x}", Sha256::digest(key.as_bytes()))
    }

    fn store_with(dir: &Path, tokens: &[&str]) -> TokenStore {
        let mut store = TokenStore::open(&dir.join("tokens.json")).expect("open");
        for token in tokens {
            store.register(token).expect("register");
        }
        store
    }

    #[test]
    fn register_validates_and_dedupes() {
        let dir = unique_temp_dir("tokens_register");
        let mut store = store_with(&dir, &[]);
        assert!(store.register(TOKEN_A).expect("first"));
        assert!(!store.register(&format!("  {TOKEN_A} ")).expect("again"));
        assert!(store.register("short").is_err());
        assert!(store.register("has spaces in it which are not allowed").is_err());
        assert_eq!(store.tokens(), vec![TOKEN_A.to_string()]);

        let reopened = TokenStore::open(&dir.join("tokens.json")).expect("reopen");
        assert_eq!(reopened.len(), 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unregister_reports_whether_anything_changed() {
        let dir = unique_temp_dir("tokens_unregister");
        let mut store = store_with(&dir, &[TOKEN_A, TOKEN_B]);
        assert!(store.unregister(TOKEN_A).expect("remove"));
        assert!(!store.unregister(TOKEN_A).expect("remove again"));
        assert_eq!(store.tokens(), vec![TOKEN_B.to_string()]);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn prune_only_drops_permanent_failures() {
        let dir = unique_temp_dir("tokens_prune");
        let mut store = store_with(&dir, &[TOKEN_A, TOKEN_B, TOKEN_C]);
        let outcomes = vec![
            TokenOutcome {
                token: TOKEN_A.to_string(),
                success: false,
                error: Some("messaging/invalid-registration-token".to_string()),
            },
            TokenOutcome {
                token: TOKEN_B.to_string(),
                success: false,
                error: Some("messaging/server-unavailable".to_string()),
            },
            TokenOutcome {
                token: TOKEN_C.to_string(),
                success: true,
                error: None,
            },
        ];
        assert_eq!(store.prune(&outcomes).expect("prune"), 1);
        assert_eq!(store.tokens(), vec![TOKEN_B.to_string(), TOKEN_C.to_string()]);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn stale_tokens_age_out() {
        let dir = unique_temp_dir("tokens_stale");
        let mut store = store_with(&dir, &[TOKEN_A]);
        let seen = store.entries()[0].last_seen;
        let day = Duration::from_secs(86_400);
        assert_eq!(store.prune_stale_at(seen + 1_000, day).expect("fresh"), 0);
        assert_eq!(
            store.prune_stale_at(seen + 2 * 86_400_000, day).expect("stale"),
            1
        );
        assert!(store.is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn publish_requires_matching_admin_key() {
        let dir = unique_temp_dir("tokens_auth");
        let store = store_with(&dir, &[TOKEN_A]);
        let messenger = RecordingMessenger::default();
        let batches = messenger.batches.clone();
        let mut notifier =
            AdminNotifier::new(store, Box::new(messenger), Some(digest("correct horse")));
        assert!(notifier.publish("wrong", &payload()).is_err());
        assert!(batches.lock().expect("lock").is_empty());
        let report = notifier.publish("correct horse", &payload()).expect("publish");
        assert_eq!(report.succeeded, 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn publish_without_configured_digest_is_disabled() {
        let dir = unique_temp_dir("tokens_disabled");
        let store = store_with(&dir, &[TOKEN_A]);
        let mut notifier = AdminNotifier::new(store, Box::new(RecordingMessenger::default()), None);
        assert!(notifier.publish("anything", &payload()).is_err());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn publish_batches_and_prunes() {
        let dir = unique_temp_dir("tokens_batches");
        let mut store = TokenStore::open(&dir.join("tokens.json")).expect("open");
        for idx in 0..(MAX_TOKENS_PER_BATCH + 3) {
            store
                .register(&format!("device-token-{idx:06}-abcdefghij"))
                .expect("register");
        }
        let messenger = RecordingMessenger {
            dead: vec!["device-token-000001-abcdefghij".to_string()],
            ..RecordingMessenger::default()
        };
        let batches = messenger.batches.clone();
        let mut notifier = AdminNotifier::new(store, Box::new(messenger), Some(digest("key")));
        let report = notifier.publish("key", &payload()).expect("publish");

        assert_eq!(*batches.lock().expect("lock"), vec![MAX_TOKENS_PER_BATCH, 3]);
        assert_eq!(
            report,
            PublishReport {
                attempted: MAX_TOKENS_PER_BATCH + 3,
                succeeded: MAX_TOKENS_PER_BATCH + 2,
                failed: 1,
                pruned: 1,
            }
        );
        assert_eq!(notifier.store().len(), MAX_TOKENS_PER_BATCH + 2);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn failed_batch_is_counted_not_retried() {
        let dir = unique_temp_dir("tokens_transport");
        let store = store_with(&dir, &[TOKEN_A, TOKEN_B]);
        let messenger = RecordingMessenger {
            fail_transport: true,
            ..RecordingMessenger::default()
        };
        let batches = messenger.batches.clone();
        let mut notifier = AdminNotifier::new(store, Box::new(messenger), Some(digest("key")));
        let report = notifier.publish("key", &payload()).expect("publish");
        assert_eq!(report.failed, 2);
        assert_eq!(report.pruned, 0);
        assert_eq!(batches.lock().expect("lock").len(), 1);
        assert_eq!(notifier.store().len(), 2);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn gateway_results_must_line_up_with_tokens() {
        let tokens = vec![TOKEN_A.to_string(), TOKEN_B.to_string()];
        let response: PushResponse = serde_json::from_str(
            r#"{"responses":[{"success":true},{"success":false,"error":"messaging/invalid-argument"}]}"#,
        )
        .expect("parse");
        let outcomes = zip_outcomes(&tokens, response.responses).expect("zip");
        assert!(outcomes[1].is_permanent_failure());
        assert!(!outcomes[0].is_permanent_failure());
        assert!(zip_outcomes(&tokens, Vec::new()).is_err());
    }
}
