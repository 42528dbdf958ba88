use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::VersionedPortal;

/// Only the record fields go into the hash. created_at never changes the
/// client's view, and version moves whenever a field does.
#[derive(Serialize)]
struct HashView<'a> {
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    scheme: Option<&'a str>,
}

/// Computes a SHA-256 hash of the portal list.
/// Portals are sorted by id for deterministic output.
pub fn compute_hash(portals: &[VersionedPortal]) -> String {
    let mut indices: Vec<usize> = (0..portals.len()).collect();
    indices.sort_by(|&a, &b| portals[a].record.id.cmp(&portals[b].record.id));

    let views: Vec<HashView<'_>> = indices
        .iter()
        .map(|&i| {
            let r = &portals[i].record;
            HashView {
                id: r.id.as_str(),
                name: &r.name,
                address: &r.address,
                port: r.port,
                scheme: r.scheme.as_deref(),
            }
        })
        .collect();

    let mut hasher = Sha256::new();
    for view in &views {
        // Serializing a struct of strings and integers cannot fail
        if let Ok(json) = serde_json::to_vec(view) {
            hasher.update(&json);
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::types::{PortalId, PortalRecord};

    fn test_portal(id: &str) -> VersionedPortal {
        VersionedPortal {
            record: PortalRecord {
                id: PortalId::from(id),
                name: "web".to_string(),
                address: "127.0.0.1".to_string(),
                port: 8080,
                scheme: Some("http".to_string()),
            },
            version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_hash_deterministic() {
        let p1 = test_portal("a");
        let p2 = test_portal("b");

        let hash1 = compute_hash(&[p1.clone(), p2.clone()]);
        let hash2 = compute_hash(&[p2, p1]);

        assert_eq!(hash1, hash2, "Hash should be same regardless of input order");
    }

    #[test]
    fn test_hash_changes_on_modification() {
        let p1 = test_portal("a");
        let mut p2 = test_portal("a");

        let hash1 = compute_hash(&[p1]);

        p2.record.port = 9090;
        let hash2 = compute_hash(&[p2]);

        assert_ne!(hash1, hash2, "Hash should change when a portal changes");
    }

    #[test]
    fn test_hash_stable_across_timestamp_changes() {
        let p1 = test_portal("a");
        let mut p2 = test_portal("a");
        p2.created_at = Utc::now() - chrono::Duration::seconds(60);

        assert_eq!(compute_hash(&[p1]), compute_hash(&[p2]));
    }

    #[test]
    fn test_empty_listing_hash() {
        assert_eq!(compute_hash(&[]), hex::encode(Sha256::digest(b"")));
    }
}
