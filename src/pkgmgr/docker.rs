//! Interface to the `docker` CLI: image-digest freshness checks.
//!
//! A "package" here is an image reference (`repo:tag`); an update exists
//! when the registry digest for the tag differs from the locally pinned
//! digest. Installing means re-pulling the tag.

use super::{run_command, DryRunReport, RunOutput};
use crate::proto::{DiscoveryItem, PackageType, Severity};
use anyhow::{bail, Result};
use serde::Deserialize;

/// Short digest length used as a displayable version.
const DIGEST_DISPLAY_LEN: usize = 19; // "sha256:" + 12 hex chars

/// Docker image registry client via the local CLI.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Docker;

/// `docker manifest inspect -v` descriptor (only fields we read).
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Descriptor")]
    descriptor: Descriptor,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

impl Docker {
    pub(crate) async fn is_available(&self) -> bool {
        super::probe("docker", &["version", "--format", "{{.Client.Version}}"]).await
    }

    /// Compare local image digests against their registries.
    pub(crate) async fn scan(&self) -> Result<Vec<DiscoveryItem>> {
        let listing = run_command(
            "docker",
            &[
                "images",
                "--digests",
                "--format",
                "{{.Repository}}:{{.Tag}} {{.Digest}}",
            ],
        )
        .await?;
        if !listing.success() {
            bail!("docker images failed:\n{}", listing.stderr);
        }

        let mut items = Vec::new();
        for (reference, local_digest) in parse_image_list(&listing.stdout) {
            let remote = match self.remote_digest(&reference).await {
                Ok(d) => d,
                Err(e) => {
                    // Unreachable registries must not abort the scan.
                    log::debug!("skipping {}: {}", reference, e);
                    continue;
                }
            };
            if remote != local_digest {
                items.push(DiscoveryItem {
                    package_type: PackageType::DockerImage,
                    package_name: reference.clone(),
                    current_version: short_digest(&local_digest),
                    available_version: short_digest(&remote),
                    severity: Severity::Moderate,
                    source: registry_of(&reference),
                    metadata: Default::default(),
                });
            }
        }
        Ok(items)
    }

    /// Registry digest for a tag, via `docker manifest inspect -v`.
    async fn remote_digest(&self, reference: &str) -> Result<String> {
        let out = run_command("docker", &["manifest", "inspect", "-v", reference]).await?;
        if !out.success() {
            bail!("manifest inspect failed: {}", out.stderr.trim());
        }
        parse_manifest_digest(&out.stdout)
    }

    /// The dry-run for an image is the freshness check itself.
    pub(crate) async fn dry_run(&self, name: &str) -> Result<DryRunReport> {
        let remote = self.remote_digest(name).await?;
        Ok(DryRunReport {
            dependencies: Vec::new(),
            output: format!("registry digest for {}: {}", name, remote),
        })
    }

    pub(crate) async fn install(&self, name: &str) -> Result<RunOutput> {
        run_command("docker", &["pull", "--quiet", name]).await
    }

    pub(crate) async fn install_multiple(&self, names: &[String]) -> Result<RunOutput> {
        let mut combined = RunOutput::default();
        for name in names {
            let out = self.install(name).await?;
            combined.stdout.push_str(&out.stdout);
            combined.stderr.push_str(&out.stderr);
            combined.exit_code = out.exit_code;
            if !out.success() {
                break;
            }
        }
        Ok(combined)
    }

    /// There is no catalogue of "all pending" images beyond a scan, so
    /// upgrade re-pulls every locally tagged image.
    pub(crate) async fn upgrade(&self) -> Result<RunOutput> {
        let listing = run_command(
            "docker",
            &[
                "images",
                "--digests",
                "--format",
                "{{.Repository}}:{{.Tag}} {{.Digest}}",
            ],
        )
        .await?;
        let names: Vec<String> = parse_image_list(&listing.stdout)
            .into_iter()
            .map(|(reference, _)| reference)
            .collect();
        self.install_multiple(&names).await
    }

    /// Rollback re-points to a digest-pinned reference.
    pub(crate) async fn rollback(&self, name: &str, version: &str) -> Result<RunOutput> {
        let repo = name.split(':').next().unwrap_or(name);
        let pinned = format!("{}@{}", repo, version);
        run_command("docker", &["pull", "--quiet", &pinned]).await
    }
}

/// Parse `docker images --digests --format '{{.Repository}}:{{.Tag}} {{.Digest}}'`.
fn parse_image_list(stdout: &str) -> Vec<(String, String)> {
    let mut images = Vec::new();
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        let (reference, digest) = match (fields.next(), fields.next()) {
            (Some(r), Some(d)) => (r, d),
            _ => continue,
        };
        // Untagged or never-pushed images cannot be compared.
        if reference.contains("<none>") || digest == "<none>" {
            continue;
        }
        images.push((reference.to_string(), digest.to_string()));
    }
    images
}

/// Pull the digest out of a verbose manifest inspection (single-platform
/// object or multi-platform list; the list digest is the comparable one).
fn parse_manifest_digest(stdout: &str) -> Result<String> {
    if let Ok(entry) = serde_json::from_str::<ManifestEntry>(stdout) {
        return Ok(entry.descriptor.digest);
    }
    let entries: Vec<ManifestEntry> = serde_json::from_str(stdout)?;
    entries
        .into_iter()
        .next()
        .map(|e| e.descriptor.digest)
        .ok_or_else(|| anyhow::anyhow!("empty manifest listing"))
}

fn short_digest(digest: &str) -> String {
    digest.chars().take(DIGEST_DISPLAY_LEN).collect()
}

fn registry_of(reference: &str) -> String {
    let first = reference.split('/').next().unwrap_or_default();
    if first.contains('.') || first.contains(':') {
        first.to_string()
    } else {
        "docker.io".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_list() {
        let out = "\
nginx:1.25 sha256:aaaabbbbccccddddeeee
registry.example.com/app:v2 sha256:1111222233334444
dangling:<none> <none>
";
        let images = parse_image_list(out);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].0, "nginx:1.25");
        assert_eq!(images[1].1, "sha256:1111222233334444");
    }

    #[test]
    fn test_parse_manifest_digest_object() {
        let json = r#"{"Descriptor": {"digest": "sha256:abc123"}}"#;
        assert_eq!(parse_manifest_digest(json).unwrap(), "sha256:abc123");
    }

    #[test]
    fn test_parse_manifest_digest_list() {
        let json = r#"[{"Descriptor": {"digest": "sha256:first"}},
                       {"Descriptor": {"digest": "sha256:second"}}]"#;
        assert_eq!(parse_manifest_digest(json).unwrap(), "sha256:first");
    }

    #[test]
    fn test_registry_of() {
        assert_eq!(registry_of("nginx:1.25"), "docker.io");
        assert_eq!(registry_of("registry.example.com/app:v2"), "registry.example.com");
        assert_eq!(registry_of("localhost:5000/app:v2"), "localhost:5000");
    }

    #[test]
    fn test_short_digest() {
        assert_eq!(
            short_digest("sha256:0123456789abcdef0123456789abcdef"),
            "sha256:0123456789ab"
        );
    }
}
