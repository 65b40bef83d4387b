use std::collections::BTreeMap;
use std::env;
use std::fs::{self, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use n_audit_sentinel::journal::Journal;
use n_audit_sentinel::policy::PolicyClient;
use n_audit_sentinel::scope::validate_scope;
use n_audit_sentinel::{discovery, prompt, seal, session};

const LOG_DIR: &str = "/var/lib/n-audit";
const LOG_FILE: &str = "session.log";
const RESOLV_CONF: &str = "/etc/resolv.conf";
const POLICY_NAME: &str = "n-audit-policy";
const SHELL: &str = "/bin/bash";

type LogJournal = Journal<std::fs::File>;

// journal lines are best-effort; the session must not die over one
fn jot(journal: &LogJournal, text: &str) {
    if let Err(e) = journal.write_all(text.as_bytes()) {
        warn!("journal write failed: {e}");
    }
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                error!("install SIGUSR1 handler: {e}");
                return;
            }
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!("install SIGINT handler: {e}");
                return;
            }
        };
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("install SIGTERM handler: {e}");
                return;
            }
        };

        let name = tokio::select! {
            _ = usr1.recv() => "SIGUSR1",
            _ = int.recv() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        };
        println!("\n[N-Audit] Received signal {name}. Initiating shutdown...");
        // flips exactly once; the task ends with it
        cancel.cancel();
    });
}

// countdown before touching anything, so an operator can attach a terminal
async fn debug_prewait(cancel: &CancellationToken) -> bool {
    println!("[N-Audit] DEBUG MODE ACTIVE");
    println!("[N-Audit] Attach BEFORE countdown ends to interact with the prompts.");
    println!("[N-Audit] Use: kubectl attach -it n-audit-sentinel -c n-audit");
    println!("[N-Audit] (Avoid kubectl exec - it starts a separate process.)");

    for remaining in (1..=30u32).rev() {
        if remaining == 30 || remaining % 5 == 0 {
            println!("[N-Audit] Countdown: {remaining:2}s remaining...");
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                println!("[N-Audit] Debug wait interrupted by signal.");
                return false;
            }
            _ = sleep(Duration::from_secs(1)) => {}
        }
    }
    println!("[N-Audit] Debug countdown finished. Starting session setup...");
    true
}

fn open_log(log_path: &Path) -> Result<LogJournal> {
    fs::create_dir_all(LOG_DIR).context("create log directory")?;
    fs::set_permissions(LOG_DIR, Permissions::from_mode(0o700))
        .context("restrict log directory")?;

    // O_SYNC: each journal line is durable before the next keystroke
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o644)
        .custom_flags(libc::O_SYNC)
        .open(log_path)
        .context("open log file")?;

    Ok(Journal::new(file))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    if env::var("N_AUDIT_DEBUG").as_deref() == Ok("true") && !debug_prewait(&cancel).await {
        return;
    }

    // infrastructure discovery: failures downgrade the matching policy zone
    let api_endpoint = match discovery::discover_api_endpoint() {
        Ok(ep) => {
            println!("[N-Audit] Discovered cluster API endpoint: {ep}");
            ep
        }
        Err(e) => {
            warn!("cluster API discovery failed: {e:#}");
            String::new()
        }
    };
    let resolvers = match discovery::discover_resolvers(RESOLV_CONF) {
        Ok(list) => {
            println!("[N-Audit] Discovered DNS resolvers: {}", list.join(", "));
            list
        }
        Err(e) => {
            warn!("resolver discovery failed: {e:#}");
            Vec::new()
        }
    };

    let log_path = PathBuf::from(LOG_DIR).join(LOG_FILE);
    let journal = match open_log(&log_path) {
        Ok(j) => j,
        Err(e) => {
            error!("log setup failed: {e:#}");
            std::process::exit(1);
        }
    };

    // a configured but unreadable signing key is a setup fault: better to
    // refuse now than to lose the seal after a day-long session
    if let Ok(key_path) = env::var("SSH_SIGN_KEY_PATH") {
        if !key_path.is_empty() {
            if let Err(e) = fs::File::open(&key_path) {
                error!("signing key {key_path} unreadable: {e}");
                std::process::exit(1);
            }
        }
    }

    jot(&journal, "\n=== Infrastructure Discovery ===\n");
    jot(
        &journal,
        &format!(
            "K8s API Server: {}\n",
            if api_endpoint.is_empty() {
                "unknown"
            } else {
                api_endpoint.as_str()
            }
        ),
    );
    jot(&journal, &format!("DNS Servers: {}\n", resolvers.join(", ")));
    jot(&journal, "================================\n\n");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let _ = prompt::show_banner(&mut stdout);

    let (pentester, client_name) = match prompt::get_identity(&mut stdin.lock(), &mut stdout) {
        Ok(names) => names,
        Err(e) => {
            error!("collect operator identity: {e}");
            std::process::exit(1);
        }
    };

    jot(&journal, "=== N-Audit Sentinel Session ===\n");
    jot(&journal, &format!("Pentester: {pentester}\n"));
    jot(&journal, &format!("Client: {client_name}\n"));
    jot(&journal, "================================\n\n");

    let (raw_ips, raw_domains) = match prompt::get_scope(&mut stdin.lock(), &mut stdout) {
        Ok(scope) => scope,
        Err(e) => {
            error!("collect scope: {e}");
            std::process::exit(1);
        }
    };

    let scope = validate_scope(&raw_ips, &raw_domains);
    for w in &scope.warnings {
        warn!("{w}");
        jot(&journal, &format!("Warning: {w}\n"));
    }

    jot(&journal, "--- Scope Definition ---\n");
    if !scope.ips.is_empty() {
        jot(
            &journal,
            &format!("Target IPs/CIDR: {}\n", scope.ips.join(", ")),
        );
    }
    if !scope.domains.is_empty() {
        jot(
            &journal,
            &format!("Target Domains: {}\n", scope.domains.join(", ")),
        );
    }
    if raw_ips.is_empty() && raw_domains.is_empty() {
        jot(&journal, "Scope: Unrestricted Mode\n");
        println!("[N-Audit] No scope defined. Running in unrestricted mode.");
    }
    jot(&journal, "\n");

    // an empty scope means no perimeter: nothing to apply, nothing to delete
    let mut applied_policy: Option<(PolicyClient, String)> = None;
    if !scope.is_empty() {
        let namespace = match env::var("POD_NAMESPACE") {
            Ok(ns) if !ns.is_empty() => ns,
            _ => "default".to_string(),
        };

        match PolicyClient::connect().await {
            Err(e) => {
                warn!("policy client unavailable: {e:#}");
                jot(
                    &journal,
                    &format!("Warning: Policy enforcement unavailable - {e:#}\n"),
                );
            }
            Ok(client) => {
                let labels = BTreeMap::from([(
                    "app".to_string(),
                    "n-audit-sentinel".to_string(),
                )]);

                println!("[N-Audit] Applying network policy (3-zone enforcement)...");
                jot(&journal, "--- Network Policy ---\n");
                jot(&journal, &format!("Policy Name: {POLICY_NAME}\n"));

                match client
                    .apply(
                        POLICY_NAME,
                        &namespace,
                        &labels,
                        &resolvers,
                        &api_endpoint,
                        &scope.ips,
                        &scope.domains,
                    )
                    .await
                {
                    Err(e) => {
                        warn!("policy apply failed: {e:#}");
                        jot(&journal, &format!("Status: FAILED - {e:#}\n\n"));
                    }
                    Ok(()) => {
                        println!("[N-Audit] Network policy applied successfully.");
                        jot(&journal, "Status: APPLIED\n");
                        jot(
                            &journal,
                            "Zones: Infra(API+DNS) + Maintenance(*.kali.org,github.com,docker.io,gitlab.com,pypi.org,crates.io) + Target(scope)\n\n",
                        );
                    }
                }

                // deletion runs on every exit path once a client exists, even
                // after a failed apply
                applied_policy = Some((client, namespace));
            }
        }
    }

    println!("[N-Audit] Starting protected session...");
    jot(&journal, "--- Session Started ---\n\n");

    session::supervise(&cancel, &journal, SHELL, &[]).await;

    println!("\n[N-Audit] Session terminated. Sealing log...");
    jot(&journal, "\n--- Session Ended ---\n");

    if let Some((client, namespace)) = applied_policy {
        println!("[N-Audit] Removing network policy...");
        match client.delete(POLICY_NAME, &namespace).await {
            Err(e) => {
                warn!("policy delete failed: {e:#}");
                jot(&journal, &format!("Warning: Policy deletion failed - {e:#}\n"));
            }
            Ok(()) => {
                jot(&journal, &format!("Policy removed: {POLICY_NAME}\n"));
            }
        }
    }

    // close the log handle so every line is flushed before hashing
    let mut log_file = journal.into_sink();
    if let Err(e) = log_file.flush() {
        warn!("flush log before sealing: {e}");
    }
    drop(log_file);

    match env::var("SSH_SIGN_KEY_PATH") {
        Ok(key_path) if !key_path.is_empty() => {
            match seal::seal_log_file(&log_path, &key_path) {
                Ok(()) => println!("[N-Audit] Log sealed with SSH signature."),
                Err(e) => warn!("seal failed: {e:#}"),
            }
        }
        _ => {
            println!("[N-Audit] Warning: SSH_SIGN_KEY_PATH not set; skipping seal.");
        }
    }

    println!("[N-Audit] Exiting.");
}
