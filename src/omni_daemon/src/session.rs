use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use omni_store::PASSWORD_HASH_LEN;

pub const ADMIN_USERNAME: &str = "admin";

static SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One-way hash stored in the user table: hex sha256, truncated to the
/// 32-byte on-disk hash field.
pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(PASSWORD_HASH_LEN);
    hash
}

/// Map from opaque session id to authenticated username. Sessions never
/// expire within a run.
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<String, String>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh session id and bind it to `username`. The trailing
    /// sequence number keeps ids unique even for two logins within one
    /// second.
    pub fn open(&mut self, username: &str) -> String {
        let session_id = format!(
            "sess_{}_{}_{}",
            username,
            unix_timestamp(),
            SESSION_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        self.sessions.insert(session_id.clone(), username.to_string());
        session_id
    }

    pub fn username(&self, session_id: &str) -> Option<&str> {
        self.sessions.get(session_id).map(String::as_str)
    }

    /// Map a client's virtual path to a physical one, enforcing the
    /// per-user jail. `None` means denial; existence is checked later by
    /// the directory tree.
    pub fn translate(&self, virtual_path: &str, session_id: &str) -> Option<String> {
        let username = self.username(session_id)?;

        // Admin sees the raw volume.
        if username == ADMIN_USERNAME {
            return Some(virtual_path.to_string());
        }

        if virtual_path.contains("..") {
            return None;
        }

        let jail_root = format!("/home/{}", username);
        if virtual_path.is_empty() || virtual_path == "/" {
            return Some(jail_root);
        }
        if virtual_path.starts_with('/') {
            Some(format!("{}{}", jail_root, virtual_path))
        } else {
            Some(format!("{}/{}", jail_root, virtual_path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_matches_bootstrap_admin_hash() {
        // The formatted volume stores this literal hash for the admin user.
        assert_eq!(hash_password("admin"), "8c6976e5b5410415bde908bd4dee15df");
        assert_eq!(hash_password("admin").len(), PASSWORD_HASH_LEN);
        assert_ne!(hash_password("a"), hash_password("b"));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let mut table = SessionTable::new();
        let first = table.open("alice");
        let second = table.open("alice");
        assert_ne!(first, second);
        assert_eq!(table.username(&first), Some("alice"));
        assert_eq!(table.username("sess_bogus_0_0"), None);
    }

    #[test]
    fn test_translate_requires_a_session() {
        let table = SessionTable::new();
        assert_eq!(table.translate("/", "nope"), None);
    }

    #[test]
    fn test_translate_jails_normal_users() {
        let mut table = SessionTable::new();
        let sid = table.open("alice");

        assert_eq!(table.translate("", &sid).unwrap(), "/home/alice");
        assert_eq!(table.translate("/", &sid).unwrap(), "/home/alice");
        assert_eq!(
            table.translate("/docs/note.txt", &sid).unwrap(),
            "/home/alice/docs/note.txt"
        );
        // A missing leading slash is supplied.
        assert_eq!(
            table.translate("note.txt", &sid).unwrap(),
            "/home/alice/note.txt"
        );
    }

    #[test]
    fn test_translate_rejects_traversal() {
        let mut table = SessionTable::new();
        let sid = table.open("alice");
        assert_eq!(table.translate("/../etc/passwd", &sid), None);
        assert_eq!(table.translate("..", &sid), None);
        assert_eq!(table.translate("/a/../b", &sid), None);
    }

    #[test]
    fn test_translate_passes_admin_through() {
        let mut table = SessionTable::new();
        let sid = table.open(ADMIN_USERNAME);
        assert_eq!(table.translate("/home/alice", &sid).unwrap(), "/home/alice");
        assert_eq!(table.translate("/", &sid).unwrap(), "/");
    }

    #[test]
    fn test_jail_containment_for_accepted_paths() {
        let mut table = SessionTable::new();
        let sid = table.open("bob");
        for path in ["", "/", "/x", "x/y", "/deep/er/file", "//odd//path"] {
            let physical = table.translate(path, &sid).unwrap();
            assert!(physical.starts_with("/home/bob"), "path {}", path);
            assert!(!physical.contains(".."));
        }
    }
}
