//! SBOM synthesizer (`spec.md` §4.7): deterministic CycloneDX 1.5 / SPDX 2.3
//! JSON documents, pure over `(VendorLock, VendorConfig)`.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::model::{VendorConfig, VendorLock};

/// The document/root-component name. `cyclonedx`/`spdx` are pinned to take
/// only `(VendorLock, VendorConfig)` (`SPEC_FULL.md` §4.7), and neither
/// struct carries a project identity of its own, so both documents name
/// the downstream project generically; see `DESIGN.md`.
const PROJECT_NAME: &str = "downstream-project";

/// CycloneDX 1.5 JSON BOM. The serial number is a random `urn:uuid:` — not
/// deterministic across calls, consistent with every other SBOM tool
/// treating `serialNumber` as an identity for this particular document
/// generation, not a content hash.
pub fn cyclonedx(lock: &VendorLock, config: &VendorConfig) -> Value {
    let components: Vec<Value> = lock
        .vendors
        .iter()
        .map(|entry| cyclonedx_component(entry, config))
        .collect();

    json!({
        "bomFormat": "CycloneDX",
        "specVersion": "1.5",
        "serialNumber": format!("urn:uuid:{}", Uuid::new_v4()),
        "version": 1,
        "metadata": {
            "component": {
                "type": "application",
                "name": PROJECT_NAME,
            }
        },
        "components": components,
    })
}

fn cyclonedx_component(entry: &crate::model::LockDetails, config: &VendorConfig) -> Value {
    let vendor = config.find(&entry.name);
    let url = vendor.map(|v| v.url.as_str()).unwrap_or_default();
    let version = entry
        .source_version_tag
        .clone()
        .unwrap_or_else(|| entry.commit_hash.clone());
    let purl = crate::purl::synthesize(url, &entry.name, &version);

    let hashes: Vec<Value> = entry
        .file_hashes
        .iter()
        .map(|(path, digest)| {
            json!({
                "alg": "SHA-256",
                "content": digest,
                "name": path,
            })
        })
        .collect();

    let mut component = json!({
        "type": "library",
        "name": entry.name,
        "version": version,
        "purl": purl,
        "hashes": hashes,
        "externalReferences": [
            {
                "type": "vcs",
                "url": url,
            }
        ],
        "properties": [
            { "name": "git-vendor:commit", "value": entry.commit_hash },
            { "name": "git-vendor:ref", "value": entry.reference },
            { "name": "git-vendor:vendored_at", "value": entry.vendored_at },
            { "name": "git-vendor:vendored_by", "value": entry.vendored_by },
            { "name": "git-vendor:last_synced_at", "value": entry.last_synced_at },
        ],
    });

    if !entry.license_spdx.is_empty()
        && let Value::Object(map) = &mut component
    {
        map.insert(
            "licenses".to_string(),
            json!([{ "license": { "id": entry.license_spdx } }]),
        );
    }

    component
}

/// SPDX 2.3 JSON document.
pub fn spdx(lock: &VendorLock, config: &VendorConfig) -> Value {
    let doc_uuid = Uuid::new_v4();
    let namespace = format!("https://git-vendor.dev/spdx/{PROJECT_NAME}/{doc_uuid}");

    let mut packages = Vec::new();
    let mut relationships = Vec::new();

    for entry in &lock.vendors {
        let spdx_id = format!("SPDXRef-Package-{}", sanitize_spdx_id(&entry.name));
        let vendor = config.find(&entry.name);
        let url = vendor.map(|v| v.url.as_str()).unwrap_or_default();
        let version = entry
            .source_version_tag
            .clone()
            .unwrap_or_else(|| entry.commit_hash.clone());
        let purl = crate::purl::synthesize(url, &entry.name, &version);

        let mut package = json!({
            "SPDXID": spdx_id,
            "name": entry.name,
            "versionInfo": version,
            "downloadLocation": url,
            "externalRefs": [
                {
                    "referenceCategory": "PACKAGE-MANAGER",
                    "referenceType": "purl",
                    "referenceLocator": purl,
                }
            ],
        });

        if !entry.license_spdx.is_empty()
            && let Value::Object(map) = &mut package
        {
            map.insert(
                "licenseConcluded".to_string(),
                Value::String(entry.license_spdx.clone()),
            );
        }

        relationships.push(json!({
            "spdxElementId": "SPDXRef-DOCUMENT",
            "relationshipType": "DESCRIBES",
            "relatedSpdxElement": spdx_id,
        }));
        packages.push(package);
    }

    json!({
        "spdxVersion": "SPDX-2.3",
        "dataLicense": "CC0-1.0",
        "SPDXID": "SPDXRef-DOCUMENT",
        "name": PROJECT_NAME,
        "documentNamespace": namespace,
        "packages": packages,
        "relationships": relationships,
    })
}

/// `PackageSPDXIdentifier = Package-<sanitized-name>`, replacing any
/// character outside `[A-Za-z0-9.-]` with `-`.
fn sanitize_spdx_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BranchSpec, LockDetails, PathMapping, Source, VendorSpec};
    use std::collections::BTreeMap;

    fn sample() -> (VendorLock, VendorConfig) {
        let config = VendorConfig {
            vendors: vec![VendorSpec {
                name: "lib foo".to_string(),
                url: "https://github.com/owner/libfoo.git".to_string(),
                license: "MIT".to_string(),
                source: Source::External,
                branches: vec![BranchSpec {
                    reference: "main".to_string(),
                    mappings: vec![PathMapping {
                        from: "src".to_string(),
                        to: "vendor/libfoo".to_string(),
                    }],
                }],
                group: None,
            }],
        };
        let mut file_hashes = BTreeMap::new();
        file_hashes.insert("vendor/libfoo/a.go".to_string(), "deadbeef".to_string());
        let lock = VendorLock {
            version: crate::model::current_schema_string(),
            vendors: vec![LockDetails {
                name: "lib foo".to_string(),
                reference: "main".to_string(),
                commit_hash: "abcdef1234567890".to_string(),
                source_version_tag: Some("v1.2.3".to_string()),
                file_hashes,
                updated: "2026-01-01T00:00:00Z".to_string(),
                vendored_at: "2026-01-01T00:00:00Z".to_string(),
                vendored_by: "git-vendor/0.1.0".to_string(),
                last_synced_at: "2026-01-01T00:00:00Z".to_string(),
                license_spdx: "MIT".to_string(),
                provenance: None,
                extra: serde_yaml::Mapping::new(),
            }],
        };
        (lock, config)
    }

    #[test]
    fn cyclonedx_has_one_component_per_lock_entry() {
        let (lock, config) = sample();
        let doc = cyclonedx(&lock, &config);
        assert_eq!(doc["bomFormat"], "CycloneDX");
        assert_eq!(doc["specVersion"], "1.5");
        assert!(doc["serialNumber"].as_str().unwrap().starts_with("urn:uuid:"));
        let components = doc["components"].as_array().unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0]["name"], "lib foo");
        assert_eq!(components[0]["version"], "v1.2.3");
        assert!(components[0]["purl"].as_str().unwrap().contains("pkg:github"));
        assert_eq!(components[0]["licenses"][0]["license"]["id"], "MIT");
    }

    #[test]
    fn spdx_sanitizes_package_identifier() {
        let (lock, config) = sample();
        let doc = spdx(&lock, &config);
        assert_eq!(doc["spdxVersion"], "SPDX-2.3");
        let packages = doc["packages"].as_array().unwrap();
        assert_eq!(packages[0]["SPDXID"], "SPDXRef-Package-lib-foo");
        let relationships = doc["relationships"].as_array().unwrap();
        assert_eq!(relationships[0]["relatedSpdxElement"], "SPDXRef-Package-lib-foo");
        assert_eq!(relationships[0]["relationshipType"], "DESCRIBES");
    }

    #[test]
    fn spdx_document_namespace_includes_uuid() {
        let (lock, config) = sample();
        let doc = spdx(&lock, &config);
        let ns = doc["documentNamespace"].as_str().unwrap();
        assert!(ns.starts_with("https://git-vendor.dev/spdx/"));
    }

    #[test]
    fn sanitize_spdx_id_replaces_invalid_chars() {
        assert_eq!(sanitize_spdx_id("lib foo@v2"), "lib-foo-v2");
    }
}
