//! Privileged-command allowlist.
//!
//! Package operations run with elevated privileges, so every invocation
//! is checked in-process against a static table of permitted
//! program/subcommand/flag combinations before it is spawned. Unknown
//! combinations fail closed with a descriptive error.

use anyhow::{bail, Result};
use regex::Regex;

/// One allowlist entry.
struct AllowRule {
    program: &'static str,
    /// Permitted first arguments.
    subcommands: &'static [&'static str],
    /// Permitted literal flags anywhere after the subcommand.
    flags: &'static [&'static str],
    /// Pattern for positional operands (package names, image refs, pins).
    operand: &'static Regex,
}

lazy_static::lazy_static! {
    /// Package names, version pins (`pkg=1.2`), image refs, KB ids.
    static ref OPERAND: Regex =
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+:/@=~-]*$").unwrap();
    /// PowerShell scripts are built in-process from fixed templates; the
    /// payload position accepts what the templates produce.
    static ref POWERSHELL_PAYLOAD: Regex = Regex::new(r"^[^\x00]+$").unwrap();

    static ref RULES: Vec<AllowRule> = vec![
        AllowRule {
            program: "apt-get",
            subcommands: &["update", "upgrade", "install"],
            flags: &["-y", "-q", "-qq", "--dry-run", "--allow-downgrades"],
            operand: &OPERAND,
        },
        AllowRule {
            program: "apt",
            subcommands: &["list"],
            flags: &["--upgradable", "-qq"],
            operand: &OPERAND,
        },
        AllowRule {
            program: "dnf",
            subcommands: &["check-update", "install", "upgrade", "downgrade", "updateinfo"],
            flags: &["-y", "-q", "--assumeno", "--refresh", "list", "--security"],
            operand: &OPERAND,
        },
        AllowRule {
            program: "docker",
            subcommands: &["images", "pull", "image", "manifest", "version"],
            flags: &[
                "--digests", "--format", "{{.Repository}}:{{.Tag}} {{.Digest}}",
                "inspect", "-v", "--quiet",
            ],
            operand: &OPERAND,
        },
        AllowRule {
            program: "winget",
            subcommands: &["upgrade", "list", "--version"],
            flags: &[
                "--silent", "--id", "--all", "--exact",
                "--accept-source-agreements", "--accept-package-agreements",
                "--disable-interactivity", "--include-unknown",
            ],
            operand: &OPERAND,
        },
        AllowRule {
            program: "powershell",
            subcommands: &["-NoProfile"],
            flags: &["-NonInteractive", "-Command"],
            operand: &POWERSHELL_PAYLOAD,
        },
    ];
}

/// Check an invocation against the allowlist; errors name the first
/// offending token.
pub(crate) fn ensure_allowed(program: &str, args: &[&str]) -> Result<()> {
    let rule = match RULES.iter().find(|r| r.program == program) {
        Some(r) => r,
        None => bail!("program '{}' is not allowlisted", program),
    };

    let first = match args.first() {
        Some(f) => *f,
        None => bail!("bare '{}' invocation is not allowlisted", program),
    };
    if !rule.subcommands.contains(&first) {
        bail!("'{} {}' is not allowlisted", program, first);
    }

    for arg in &args[1..] {
        if rule.flags.contains(arg) || rule.subcommands.contains(arg) {
            continue;
        }
        if rule.operand.is_match(arg) {
            continue;
        }
        bail!("argument '{}' to '{}' is not allowlisted", arg, program);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_invocations() {
        assert!(ensure_allowed("apt-get", &["install", "-y", "curl"]).is_ok());
        assert!(ensure_allowed("apt-get", &["install", "--dry-run", "curl=7.88.1-1"]).is_ok());
        assert!(ensure_allowed("apt", &["list", "--upgradable"]).is_ok());
        assert!(ensure_allowed("dnf", &["check-update", "-q"]).is_ok());
        assert!(ensure_allowed("docker", &["pull", "--quiet", "nginx:1.25"]).is_ok());
        assert!(ensure_allowed(
            "winget",
            &["upgrade", "--id", "Mozilla.Firefox", "--silent"]
        )
        .is_ok());
    }

    #[test]
    fn test_unknown_program_fails_closed() {
        let err = ensure_allowed("rm", &["-rf", "/"]).unwrap_err();
        assert!(err.to_string().contains("not allowlisted"));
    }

    #[test]
    fn test_unknown_subcommand_fails_closed() {
        assert!(ensure_allowed("apt-get", &["source", "curl"]).is_err());
        assert!(ensure_allowed("docker", &["run", "alpine"]).is_err());
    }

    #[test]
    fn test_hostile_operand_fails_closed() {
        assert!(ensure_allowed("apt-get", &["install", "-y", "curl; rm -rf /"]).is_err());
        assert!(ensure_allowed("apt-get", &["install", "$(reboot)"]).is_err());
        assert!(ensure_allowed("apt-get", &["install", "--force-yes", "curl"]).is_err());
    }

    #[test]
    fn test_empty_args_fail_closed() {
        assert!(ensure_allowed("apt-get", &[]).is_err());
    }
}
