//! dkcloak operator CLI
//!
//! Usage: dkcloak [OPTIONS]
//!
//! Options:
//!   --generate-identity      Generate a new identity backup
//!   --show-name <FILE>       List identities in a backup
//!   --generate-config        Generate a default configuration
//!   --calibrate <HOST>       Calibrate a front origin
//!   --sign-entry ...         Sign a front origin registry entry
//!   -h, --help               Print help information

use std::env;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};

use dkcloak::calibration::{HandshakeProber, Prober, SimulatedProber, TemplateId};
use dkcloak::identity::{ExportMode, IdentityBackup};
use dkcloak::{Calibrator, CloakConfig, CloakConfigFile, ComplianceProfile, IdentityManager, RegistryEntry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so JSON output stays clean. RUST_LOG overrides.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        bail!("no option given");
    }

    match args[1].as_str() {
        "-h" | "--help" => {
            print_usage();
        }
        "--generate-identity" => {
            let include_private = args[2..].iter().any(|a| a == "--include-private");
            generate_identity(include_private)?;
        }
        "--show-name" => {
            if args.len() < 3 {
                bail!("--show-name requires a backup file path");
            }
            show_name(&args[2])?;
        }
        "--generate-config" => {
            generate_config()?;
        }
        "--calibrate" => {
            if args.len() < 3 {
                bail!("--calibrate requires a hostname");
            }
            let rest = &args[3..];
            let config_path = rest
                .iter()
                .position(|a| a == "--config")
                .and_then(|i| rest.get(i + 1));
            let simulated = rest.iter().any(|a| a == "--simulated");
            calibrate(&args[2], config_path.map(String::as_str), simulated).await?;
        }
        "--sign-entry" => {
            if args.len() < 7 {
                bail!(
                    "--sign-entry requires <backup.json> <template-id> <host-pattern> <profile> <ttl-secs>"
                );
            }
            sign_entry(&args[2], &args[3], &args[4], &args[5], &args[6])?;
        }
        _ => {
            print_usage();
            bail!("unknown option: {}", args[1]);
        }
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"dkcloak - self-certifying identities and front origin calibration

USAGE:
    dkcloak [OPTIONS]

OPTIONS:
    --generate-identity [--include-private]
                            Generate a new identity backup (JSON)
    --show-name <FILE>      List the identities in a backup
    --generate-config       Generate a default configuration (TOML)
    --calibrate <HOST> [--config <FILE>] [--simulated]
                            Probe a front origin and print its template
    --sign-entry <BACKUP> <TEMPLATE_ID> <HOST_PATTERN> <PROFILE> <TTL_SECS>
                            Sign a registry entry with the backup's default identity
    -h, --help              Print help information

EXAMPLES:
    Create an operator identity:
        dkcloak --generate-identity --include-private > operator.json

    Fingerprint a front origin:
        dkcloak --calibrate www.example.com

    Approve it for a host pattern:
        dkcloak --sign-entry operator.json <id> '*.example.com' STANDARD 86400
"#
    );
}

fn generate_identity(include_private: bool) -> anyhow::Result<()> {
    let manager = IdentityManager::new();
    let identity = manager.create_identity(None);

    let mode = if include_private {
        ExportMode::IncludePrivate
    } else {
        ExportMode::PublicOnly
    };
    let backup = manager.export_all(mode);

    println!("{}", serde_json::to_string_pretty(&backup)?);
    eprintln!("Name: {}", identity.name());
    if include_private {
        eprintln!("Warning: this backup contains a private key. Store it securely.");
    }

    Ok(())
}

fn load_backup(path: &str) -> anyhow::Result<IdentityManager> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let backup: IdentityBackup = serde_json::from_str(&content)?;

    let manager = IdentityManager::new();
    manager.import_backup(&backup)?;
    Ok(manager)
}

fn show_name(path: &str) -> anyhow::Result<()> {
    let manager = load_backup(path)?;

    println!("Identities:");
    for (i, info) in manager.list().iter().enumerate() {
        println!(
            "  [{}] {}{} ({}{})",
            i + 1,
            info.name,
            if info.is_default { " *" } else { "" },
            info.label,
            if info.has_private_key { ", can sign" } else { "" },
        );
    }

    Ok(())
}

fn generate_config() -> anyhow::Result<()> {
    let config_file = CloakConfigFile::from_config(&CloakConfig::default());

    println!("# dkcloak configuration");
    println!("# Generated: {}", chrono::Utc::now());
    println!();
    println!("{}", config_file.to_toml()?);

    Ok(())
}

async fn calibrate(hostname: &str, config_path: Option<&str>, simulated: bool) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => {
            let content =
                std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            CloakConfigFile::from_toml(&content)?.to_config()?
        }
        None => CloakConfig::default(),
    };

    let prober: Arc<dyn Prober> = if simulated {
        Arc::new(SimulatedProber::new())
    } else {
        Arc::new(HandshakeProber::new())
    };

    let calibrator = Calibrator::new(config.calibration, prober);
    let template = calibrator.calibrate(hostname).await?;

    println!("{}", serde_json::to_string_pretty(&template)?);
    eprintln!("TemplateID: {}", template.template_id);

    Ok(())
}

fn sign_entry(
    backup_path: &str,
    template_id: &str,
    host_pattern: &str,
    profile: &str,
    ttl_secs: &str,
) -> anyhow::Result<()> {
    let manager = load_backup(backup_path)?;
    let signer = manager.default_identity()?;
    if !signer.has_private_key() {
        bail!("{} has no private key; export it with --include-private", signer.name());
    }

    let template_id = TemplateId::from_hex(template_id)?;
    let profile: ComplianceProfile = profile.parse()?;
    let ttl_secs: u64 = ttl_secs
        .parse()
        .map_err(|e| anyhow!("invalid ttl {ttl_secs:?}: {e}"))?;
    let expiry = expiry_after(dkcloak::now_millis(), ttl_secs)?;

    let entry = RegistryEntry::new(template_id, host_pattern, profile, expiry).sign(&signer)?;

    println!("{}", serde_json::to_string_pretty(&entry)?);
    eprintln!("Signed by {} (trust key {})", signer.name(), signer.public_key());

    Ok(())
}

/// Absolute expiry `ttl_secs` from `now` (ms since the Unix epoch).
fn expiry_after(now: u64, ttl_secs: u64) -> anyhow::Result<u64> {
    ttl_secs
        .checked_mul(1000)
        .and_then(|ms| now.checked_add(ms))
        .ok_or_else(|| anyhow!("ttl {ttl_secs} out of range"))
}
