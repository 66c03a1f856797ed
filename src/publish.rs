// 🚚 Publish Package - signed manifest of what a run changed
//
// The package lists each artifact with its size and SHA-256, the versioned
// copies that were taken, and the checks that passed. A deployment step
// verifies it with `verify_package` before applying anything.
//
// Signature covers the canonical JSON of the package without its signature:
//   key supplied  → HMAC-SHA256(key, canonical)
//   no key        → SHA-256(canonical)   (integrity only)

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PackageError;
use crate::period::ReportingPeriod;
use crate::report::LATEST_REPORT;
use crate::snapshot::{find_non_finite, missing_required_fields, LATEST_SNAPSHOT, REQUIRED_FIELDS};

type HmacSha256 = Hmac<Sha256>;

pub const PACKAGE_KIND: &str = "PUBLISH_PACKAGE";
pub const PACKAGE_VERSION: &str = "publish_package/v1";
pub const ALG_HMAC_SHA256: &str = "hmac-sha256";
pub const ALG_SHA256: &str = "sha256";

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";

// ============================================================================
// PACKAGE MODEL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub content_type: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLink {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCheck {
    #[serde(rename = "type")]
    pub check_type: String,
    pub path: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagePeriod {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPackage {
    pub kind: String,
    pub version: String,
    pub package_id: Uuid,
    pub generated_at: String,
    pub period: PackagePeriod,
    pub artifacts: Vec<Artifact>,
    pub snapshots: Vec<SnapshotLink>,
    pub checks: Vec<PackageCheck>,
    pub commit_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

// ============================================================================
// HELPERS
// ============================================================================

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Repo-relative and never climbing above the root
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.trim().is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return false;
    }

    let mut depth: i32 = 0;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    depth > 0
}

/// Hash one file under `root` into an artifact entry
pub fn describe_artifact(root: &Path, rel_path: &str, content_type: &str) -> Result<Artifact> {
    if !is_safe_relative_path(rel_path) {
        return Err(PackageError::UnsafePath(rel_path.to_string()).into());
    }
    let full = root.join(rel_path);
    let data = fs::read(&full).with_context(|| format!("Failed to read artifact {}", full.display()))?;

    Ok(Artifact {
        path: rel_path.to_string(),
        content_type: content_type.to_string(),
        bytes: data.len() as u64,
        sha256: sha256_hex(&data),
    })
}

/// json_parse, required_fields and no_nan_inf on the latest snapshot
pub fn run_snapshot_checks(root: &Path) -> Vec<PackageCheck> {
    let path = LATEST_SNAPSHOT.to_string();
    let check = |check_type: &str, passed: bool, detail: Option<String>| PackageCheck {
        check_type: check_type.to_string(),
        path: path.clone(),
        passed,
        detail,
    };

    let parsed = fs::read_to_string(root.join(LATEST_SNAPSHOT))
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).map_err(|e| e.to_string()));

    match parsed {
        Ok(value) => {
            let missing = missing_required_fields(&value, REQUIRED_FIELDS);
            let non_finite = find_non_finite(&value, "");
            vec![
                check("json_parse", true, None),
                check(
                    "required_fields",
                    missing.is_empty(),
                    if missing.is_empty() { None } else { Some(missing.join(", ")) },
                ),
                check("no_nan_inf", non_finite.is_none(), non_finite),
            ]
        }
        Err(e) => vec![
            check("json_parse", false, Some(e)),
            check("required_fields", false, None),
            check("no_nan_inf", false, None),
        ],
    }
}

// ============================================================================
// BUILD / SIGN
// ============================================================================

impl PublishPackage {
    /// Describe the latest snapshot and report under `root`
    pub fn build(
        root: &Path,
        period: &ReportingPeriod,
        snapshots: Vec<SnapshotLink>,
        checks: Vec<PackageCheck>,
    ) -> Result<Self> {
        let artifacts = vec![
            describe_artifact(root, LATEST_SNAPSHOT, CONTENT_TYPE_JSON)?,
            describe_artifact(root, LATEST_REPORT, CONTENT_TYPE_HTML)?,
        ];

        for link in &snapshots {
            for p in [&link.from, &link.to] {
                if !is_safe_relative_path(p) {
                    return Err(PackageError::UnsafePath(p.clone()).into());
                }
            }
        }

        let end = period.end.format("%Y-%m-%d").to_string();
        Ok(PublishPackage {
            kind: PACKAGE_KIND.to_string(),
            version: PACKAGE_VERSION.to_string(),
            package_id: Uuid::new_v4(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            period: PackagePeriod {
                start: period.start.format("%Y-%m-%d").to_string(),
                end: end.clone(),
            },
            artifacts,
            snapshots,
            checks,
            commit_message: format!("chore(data): update finance_latest + bp_latest for {}", end),
            signature: None,
        })
    }

    pub fn all_checks_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Canonical bytes that the signature covers
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let unsigned = PublishPackage {
            signature: None,
            ..self.clone()
        };
        serde_json::to_vec(&unsigned).context("Failed to serialize package for signing")
    }

    pub fn sign(&mut self, key: Option<&[u8]>) -> Result<()> {
        let payload = self.signing_payload()?;
        let signature = match key {
            Some(key) => {
                let mut mac = HmacSha256::new_from_slice(key).map_err(|_| PackageError::InvalidKey)?;
                mac.update(&payload);
                Signature {
                    algorithm: ALG_HMAC_SHA256.to_string(),
                    value: hex::encode(mac.finalize().into_bytes()),
                }
            }
            None => Signature {
                algorithm: ALG_SHA256.to_string(),
                value: sha256_hex(&payload),
            },
        };
        debug!(algorithm = %signature.algorithm, "signed publish package");
        self.signature = Some(signature);
        Ok(())
    }

    pub fn verify_signature(&self, key: Option<&[u8]>) -> Result<()> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| PackageError::BadSignature("package is unsigned".to_string()))?;
        let payload = self.signing_payload()?;

        match signature.algorithm.as_str() {
            ALG_HMAC_SHA256 => {
                let key = key.ok_or_else(|| {
                    PackageError::BadSignature("package is HMAC-signed but no key was supplied".to_string())
                })?;
                let expected = hex::decode(&signature.value)
                    .map_err(|_| PackageError::BadSignature("signature is not hex".to_string()))?;
                let mut mac = HmacSha256::new_from_slice(key).map_err(|_| PackageError::InvalidKey)?;
                mac.update(&payload);
                mac.verify_slice(&expected)
                    .map_err(|_| PackageError::BadSignature("HMAC does not match".to_string()))?;
            }
            ALG_SHA256 => {
                if key.is_some() {
                    return Err(PackageError::BadSignature(
                        "a signing key was supplied but the package only carries a plain digest".to_string(),
                    )
                    .into());
                }
                if sha256_hex(&payload) != signature.value {
                    return Err(PackageError::BadSignature("digest does not match".to_string()).into());
                }
            }
            other => {
                return Err(PackageError::BadSignature(format!("unknown algorithm {:?}", other)).into());
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self).context("Failed to serialize publish package")?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read publish package: {:?}", path.as_ref()))?;
        serde_json::from_str(&content).context("Failed to parse publish package JSON")
    }
}

// ============================================================================
// VERIFY
// ============================================================================

/// Check kind, version, paths, artifact digests and signature
///
/// Returns the verified artifacts; the first failure aborts.
pub fn verify_package(package: &PublishPackage, root: &Path, key: Option<&[u8]>) -> Result<Vec<Artifact>> {
    if package.kind != PACKAGE_KIND {
        return Err(PackageError::WrongKind(package.kind.clone()).into());
    }
    if package.version != PACKAGE_VERSION {
        return Err(PackageError::UnsupportedVersion(package.version.clone()).into());
    }

    package.verify_signature(key)?;

    for link in &package.snapshots {
        for p in [&link.from, &link.to] {
            if !is_safe_relative_path(p) {
                return Err(PackageError::UnsafePath(p.clone()).into());
            }
        }
    }

    let mut verified = Vec::with_capacity(package.artifacts.len());
    for artifact in &package.artifacts {
        if !is_safe_relative_path(&artifact.path) {
            return Err(PackageError::UnsafePath(artifact.path.clone()).into());
        }
        let actual = describe_artifact(root, &artifact.path, &artifact.content_type)?;
        if actual.bytes != artifact.bytes {
            return Err(PackageError::SizeMismatch {
                path: artifact.path.clone(),
                expected: artifact.bytes,
                actual: actual.bytes,
            }
            .into());
        }
        if actual.sha256 != artifact.sha256 {
            return Err(PackageError::DigestMismatch {
                path: artifact.path.clone(),
                expected: artifact.sha256.clone(),
                actual: actual.sha256,
            }
            .into());
        }
        verified.push(actual);
    }

    info!(package_id = %package.package_id, artifacts = verified.len(), "publish package verified");
    Ok(verified)
}

// ============================================================================
// TESTS
// ============================================================================
