//! SBOM emission.
//!
//! Two canonical bill-of-materials shapes are emitted from lock + config:
//! one in the CycloneDX idiom, one in the SPDX idiom. Both are built as
//! plain JSON documents; one component/package per `(name, ref)` in the
//! lock, versioned by tag when known and commit hash otherwise.

use std::collections::BTreeSet;

use chrono::{SecondsFormat, Utc};
use graft_types::{LockDetails, VendorConfig, VendorLock};
use serde_json::{Value, json};

use crate::hash::sha256_hex;
use crate::license::owner_repo;
use crate::scanner::package_url;

/// Supported SBOM output shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbomFormat {
    CycloneDx,
    Spdx,
}

impl std::str::FromStr for SbomFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cyclonedx" => Ok(SbomFormat::CycloneDx),
            "spdx" => Ok(SbomFormat::Spdx),
            other => Err(format!("unknown sbom format {other:?}")),
        }
    }
}

/// Emit an SBOM in the requested shape.
pub fn emit(format: SbomFormat, config: &VendorConfig, lock: &VendorLock) -> Value {
    match format {
        SbomFormat::CycloneDx => emit_cyclonedx(config, lock),
        SbomFormat::Spdx => emit_spdx(config, lock),
    }
}

fn short_hash(details: &LockDetails) -> &str {
    &details.commit_hash[..12.min(details.commit_hash.len())]
}

fn version_of(details: &LockDetails) -> String {
    details
        .source_version_tag
        .clone()
        .unwrap_or_else(|| details.commit_hash.clone())
}

fn vendor_url<'a>(config: &'a VendorConfig, name: &str) -> Option<&'a str> {
    config.vendor(name).map(|v| v.url.as_str())
}

/// Time-based URN serial derived from the emission instant.
fn serial_number() -> String {
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
    let digest = sha256_hex(stamp.as_bytes());
    format!(
        "urn:uuid:{}-{}-{}-{}-{}",
        &digest[0..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32]
    )
}

/// Shape A: bill-of-materials in the CycloneDX idiom.
pub fn emit_cyclonedx(config: &VendorConfig, lock: &VendorLock) -> Value {
    let components: Vec<Value> = lock
        .vendors
        .iter()
        .map(|details| {
            let url = vendor_url(config, &details.name);
            let version = version_of(details);
            let purl = package_url(&details.name, url.unwrap_or(""), &version);

            let hashes: Vec<Value> = details
                .file_hashes
                .values()
                .map(|h| json!({ "alg": "SHA-256", "content": h }))
                .collect();

            let mut component = json!({
                "type": "library",
                "name": details.name,
                "version": version,
                "purl": purl,
                "bom-ref": format!("{}@{}", details.name, short_hash(details)),
                "hashes": hashes,
            });

            if let Some(spdx) = &details.license_spdx {
                component["licenses"] = json!([{ "license": { "id": spdx } }]);
            }
            if let Some(url) = url {
                component["externalReferences"] = json!([{ "type": "vcs", "url": url }]);
                if let Some((owner, _)) = owner_repo(url) {
                    component["supplier"] = json!({ "name": owner });
                }
            }
            component
        })
        .collect();

    json!({
        "bomFormat": "CycloneDX",
        "specVersion": "1.5",
        "serialNumber": serial_number(),
        "version": 1,
        "metadata": {
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "tools": [{
                "vendor": "graft",
                "name": "graft",
                "version": env!("CARGO_PKG_VERSION"),
            }],
        },
        "components": components,
    })
}

/// Collapse to `[A-Za-z0-9.-]`, the SPDX id alphabet.
fn sanitize_spdx_id(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Shape B: bill-of-materials in the SPDX idiom.
pub fn emit_spdx(config: &VendorConfig, lock: &VendorLock) -> Value {
    let created = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut used_ids = BTreeSet::new();
    let mut packages = Vec::new();
    let mut relationships = Vec::new();

    for details in &lock.vendors {
        let url = vendor_url(config, &details.name);
        let version = version_of(details);
        let purl = package_url(&details.name, url.unwrap_or(""), &version);

        let mut spdx_id = format!(
            "SPDXRef-Package-{}-{}",
            sanitize_spdx_id(&details.name),
            short_hash(details)
        );
        // Same name and commit across refs still needs a unique id.
        let mut attempt = 1;
        while !used_ids.insert(spdx_id.clone()) {
            attempt += 1;
            spdx_id = format!(
                "SPDXRef-Package-{}-{}-{attempt}",
                sanitize_spdx_id(&details.name),
                short_hash(details)
            );
        }

        let checksums: Vec<Value> = details
            .file_hashes
            .values()
            .map(|h| json!({ "algorithm": "SHA256", "checksumValue": h }))
            .collect();

        let supplier = url
            .and_then(owner_repo)
            .map(|(owner, _)| format!("Organization: {owner}"))
            .unwrap_or_else(|| "NOASSERTION".to_string());

        packages.push(json!({
            "SPDXID": spdx_id,
            "name": details.name,
            "versionInfo": version,
            "licenseDeclared": details
                .license_spdx
                .clone()
                .unwrap_or_else(|| "NOASSERTION".to_string()),
            "downloadLocation": url
                .map(str::to_string)
                .unwrap_or_else(|| "NOASSERTION".to_string()),
            "supplier": supplier,
            "checksums": checksums,
            "externalRefs": [{
                "referenceCategory": "PACKAGE-MANAGER",
                "referenceType": "purl",
                "referenceLocator": purl,
            }],
        }));

        relationships.push(json!({
            "spdxElementId": "SPDXRef-DOCUMENT",
            "relationshipType": "DESCRIBES",
            "relatedSpdxElement": spdx_id,
        }));
    }

    json!({
        "spdxVersion": "SPDX-2.3",
        "dataLicense": "CC0-1.0",
        "SPDXID": "SPDXRef-DOCUMENT",
        "name": "graft-vendored-sources",
        "documentNamespace": format!(
            "https://graft.dev/sbom/{}",
            sha256_hex(created.as_bytes())
        ),
        "creationInfo": {
            "created": created,
            "creators": [format!("Tool: graft-{}", env!("CARGO_PKG_VERSION"))],
        },
        "packages": packages,
        "relationships": relationships,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use graft_types::SCHEMA_VERSION;

    use super::*;

    fn lock_entry(name: &str, commit: &str, tag: Option<&str>) -> LockDetails {
        let mut file_hashes = BTreeMap::new();
        file_hashes.insert(format!("lib/{name}/a.rs"), "ab".repeat(32));
        file_hashes.insert(format!("lib/{name}/b.rs"), "cd".repeat(32));
        LockDetails {
            name: name.to_string(),
            ref_: "main".to_string(),
            commit_hash: commit.to_string(),
            updated: Utc::now(),
            file_hashes,
            positions: vec![],
            license_path: None,
            license_spdx: Some("MIT".to_string()),
            source_version_tag: tag.map(str::to_string),
            vendored_at: Utc::now(),
            vendored_by: "tester".to_string(),
            last_synced_at: Utc::now(),
            source: None,
            source_file_hashes: None,
            accepted_drift: None,
        }
    }

    fn fixture() -> (VendorConfig, VendorLock) {
        let config = VendorConfig {
            vendors: vec![graft_types::VendorSpec {
                name: "utils".to_string(),
                url: "https://github.com/acme/utils".to_string(),
                specs: vec![graft_types::BranchSpec {
                    ref_: "main".to_string(),
                    default_target: None,
                    mapping: vec![graft_types::PathMapping {
                        from: "src".to_string(),
                        to: "lib/utils".to_string(),
                    }],
                }],
                ..Default::default()
            }],
        };
        let lock = VendorLock {
            schema_version: SCHEMA_VERSION.to_string(),
            vendors: vec![
                lock_entry("utils", &"a".repeat(40), Some("v1.2.3")),
                lock_entry("codec", &"b".repeat(40), None),
            ],
        };
        (config, lock)
    }

    #[test]
    fn cyclonedx_has_tool_and_components() {
        let (config, lock) = fixture();
        let bom = emit_cyclonedx(&config, &lock);

        assert_eq!(bom["bomFormat"], "CycloneDX");
        assert!(
            bom["serialNumber"]
                .as_str()
                .expect("serial")
                .starts_with("urn:uuid:")
        );
        assert_eq!(bom["metadata"]["tools"][0]["name"], "graft");

        let components = bom["components"].as_array().expect("components");
        assert_eq!(components.len(), 2);

        let utils = &components[0];
        assert_eq!(utils["name"], "utils");
        // Tag wins over commit hash for the version.
        assert_eq!(utils["version"], "v1.2.3");
        assert_eq!(utils["bom-ref"], format!("utils@{}", "a".repeat(12)));
        assert_eq!(utils["purl"], "pkg:github/acme/utils@v1.2.3");
        assert_eq!(utils["licenses"][0]["license"]["id"], "MIT");
        assert_eq!(utils["externalReferences"][0]["type"], "vcs");
        assert_eq!(utils["supplier"]["name"], "acme");
        assert_eq!(utils["hashes"].as_array().expect("hashes").len(), 2);
        assert_eq!(utils["hashes"][0]["alg"], "SHA-256");

        // No config entry: version falls back to the commit hash.
        let codec = &components[1];
        assert_eq!(codec["version"], "b".repeat(40));
    }

    #[test]
    fn spdx_describes_every_package() {
        let (config, lock) = fixture();
        let doc = emit_spdx(&config, &lock);

        assert_eq!(doc["spdxVersion"], "SPDX-2.3");
        assert_eq!(doc["dataLicense"], "CC0-1.0");
        assert_eq!(doc["SPDXID"], "SPDXRef-DOCUMENT");

        let packages = doc["packages"].as_array().expect("packages");
        let relationships = doc["relationships"].as_array().expect("relationships");
        assert_eq!(packages.len(), relationships.len());

        for (pkg, rel) in packages.iter().zip(relationships) {
            assert_eq!(rel["relationshipType"], "DESCRIBES");
            assert_eq!(rel["spdxElementId"], "SPDXRef-DOCUMENT");
            assert_eq!(rel["relatedSpdxElement"], pkg["SPDXID"]);
        }
    }

    #[test]
    fn spdx_ids_are_unique_and_sanitized() {
        let config = VendorConfig::default();
        let lock = VendorLock {
            schema_version: SCHEMA_VERSION.to_string(),
            vendors: vec![
                lock_entry("my_lib!", &"c".repeat(40), None),
                lock_entry("my_lib!", &"c".repeat(40), None),
            ],
        };
        let doc = emit_spdx(&config, &lock);
        let ids: Vec<&str> = doc["packages"]
            .as_array()
            .expect("packages")
            .iter()
            .map(|p| p["SPDXID"].as_str().expect("id"))
            .collect();

        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1], "duplicate ids must be disambiguated");
        for id in ids {
            assert!(id.starts_with("SPDXRef-Package-my-lib--"));
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-')));
        }
    }

    #[test]
    fn spdx_noassertion_for_unknown_fields() {
        let config = VendorConfig::default();
        let mut entry = lock_entry("mystery", &"d".repeat(40), None);
        entry.license_spdx = None;
        let lock = VendorLock {
            schema_version: SCHEMA_VERSION.to_string(),
            vendors: vec![entry],
        };

        let doc = emit_spdx(&config, &lock);
        let pkg = &doc["packages"][0];
        assert_eq!(pkg["licenseDeclared"], "NOASSERTION");
        assert_eq!(pkg["downloadLocation"], "NOASSERTION");
        assert_eq!(pkg["supplier"], "NOASSERTION");
        assert_eq!(
            pkg["externalRefs"][0]["referenceLocator"],
            format!("pkg:generic/mystery@{}", "d".repeat(40))
        );
    }

    #[test]
    fn format_parses_from_str() {
        assert_eq!("cyclonedx".parse::<SbomFormat>(), Ok(SbomFormat::CycloneDx));
        assert_eq!("SPDX".parse::<SbomFormat>(), Ok(SbomFormat::Spdx));
        assert!("csv".parse::<SbomFormat>().is_err());
    }
}
