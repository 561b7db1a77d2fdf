use crate::bots::BotRoster;
use crate::config::{DELETED_USER_ID, DELETED_USER_NAME};
use rustc_hash::{FxHashMap, FxHashSet};
use sha2::{Digest, Sha256};

/// A resolved contributor identity, ready for aggregation and output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    /// Account name for registered users; hex digest of the address for
    /// anonymous editors. The raw IP is never stored here.
    pub display_name: String,
    pub is_anonymous: bool,
    pub is_bot: bool,
    /// True iff this is the first time the identity was observed in the run.
    pub newly_seen: bool,
}

/// Run-wide identity state: which contributor ids have been observed, and
/// which pseudonym each anonymous IP was assigned.
///
/// Pseudonyms are `IP:<n>` with a sequence starting at 0, paired with a
/// one-way SHA-256 digest of the address as the display name. The memo
/// guarantees one pseudonym per physical IP per run; an address is hashed
/// at most once.
#[derive(Default)]
pub struct IdentityRegistry {
    seen_user_ids: FxHashSet<String>,
    ip_pseudonyms: FxHashMap<String, IpPseudonym>,
    ip_sequence: u64,
    bot_user_ids: FxHashSet<String>,
}

/// Memoized identity of one anonymous address: assigned id plus the digest,
/// so an address is hashed exactly once per run.
struct IpPseudonym {
    id: String,
    digest: String,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a registered account. Bot status is checked against the
    /// roster only at first sight and cached with the identity.
    pub fn resolve_registered(&mut self, user_id: &str, name: &str, bots: &BotRoster) -> Identity {
        let newly_seen = self.seen_user_ids.insert(user_id.to_string());
        if newly_seen && bots.contains(name) {
            self.bot_user_ids.insert(user_id.to_string());
        }

        Identity {
            user_id: user_id.to_string(),
            display_name: name.to_string(),
            is_anonymous: false,
            is_bot: self.bot_user_ids.contains(user_id),
            newly_seen,
        }
    }

    /// Resolve an anonymous edit by IP address. The first encounter of an
    /// address allocates the next sequential pseudonym; later encounters
    /// return the memoized one without touching the sequence counter.
    pub fn resolve_anonymous(&mut self, ip: &str) -> Identity {
        if let Some(pseudonym) = self.ip_pseudonyms.get(ip) {
            return Identity {
                user_id: pseudonym.id.clone(),
                display_name: pseudonym.digest.clone(),
                is_anonymous: true,
                is_bot: false,
                newly_seen: false,
            };
        }

        let id = format!("IP:{}", self.ip_sequence);
        self.ip_sequence += 1;
        let digest = hash_address(ip);
        self.ip_pseudonyms.insert(
            ip.to_string(),
            IpPseudonym {
                id: id.clone(),
                digest: digest.clone(),
            },
        );
        self.seen_user_ids.insert(id.clone());

        Identity {
            user_id: id,
            display_name: digest,
            is_anonymous: true,
            is_bot: false,
            newly_seen: true,
        }
    }

    /// The constant identity for revisions whose attribution was removed.
    /// Never enters the seen-set and never reaches the user registry.
    pub fn deleted_attribution(&self) -> Identity {
        Identity {
            user_id: DELETED_USER_ID.to_string(),
            display_name: DELETED_USER_NAME.to_string(),
            is_anonymous: false,
            is_bot: false,
            newly_seen: false,
        }
    }

    pub fn seen_count(&self) -> usize {
        self.seen_user_ids.len()
    }

    pub fn anonymous_count(&self) -> u64 {
        self.ip_sequence
    }
}

fn hash_address(ip: &str) -> String {
    hex::encode(Sha256::digest(ip.as_bytes()))
}
