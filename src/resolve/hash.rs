//! Service configuration digests

use crate::descriptor::{Document, Service};
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// SHA-256 of a service's canonical JSON form, hex encoded
pub fn service_digest(service: &Service) -> Result<String> {
    let canonical = serde_json::to_vec(service)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Digests for every service in a document, keyed by service name
pub fn digests(document: &Document) -> Result<BTreeMap<String, String>> {
    document
        .services
        .iter()
        .map(|(name, service)| Ok((name.clone(), service_digest(service)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorParser;

    #[test]
    fn test_digest_is_stable_across_key_order() {
        let a = DescriptorParser::parse_str(
            "services:\n  web:\n    image: nginx\n    restart: always\n    ports: [\"80:80\"]\n",
        )
        .unwrap();
        let b = DescriptorParser::parse_str(
            "services:\n  web:\n    ports: [\"80:80\"]\n    restart: always\n    image: nginx\n",
        )
        .unwrap();

        let da = service_digest(&a.services["web"]).unwrap();
        let db = service_digest(&b.services["web"]).unwrap();
        assert_eq!(da, db);
        assert_eq!(da.len(), 64);
    }

    #[test]
    fn test_digest_changes_with_config() {
        let doc = DescriptorParser::parse_str(
            "services:\n  a:\n    image: nginx:1.19\n  b:\n    image: nginx:1.20\n",
        )
        .unwrap();
        let all = digests(&doc).unwrap();
        assert_eq!(all.len(), 2);
        assert_ne!(all["a"], all["b"]);
    }
}
