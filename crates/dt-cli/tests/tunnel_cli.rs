use std::{env, fs, path::PathBuf};

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser};
use dt_cli::{
    Cli, Command,
    hosts_cli::run_hosts,
    tunnel_cli::TunnelConfig,
};
use dt_types::ssh::{ForwardFailurePolicy, HostKeyPolicy};
use secrecy::ExposeSecret;
use serial_test::serial;

#[test]
#[serial]
fn forward_flags_parse_into_forwarding_config() {
    let cfg = parse_tunnel(&[
        "-L",
        "5432:db.internal:5432",
        "-L",
        "[::1]:9090:dest.local:443",
        "-R",
        "0.0.0.0:8080:localhost:3000",
        "-R",
        "6001::6001",
        "dev.example:2222",
    ])
    .expect("forward flags");

    assert_eq!(cfg.address, "dev.example:2222");
    assert_eq!(cfg.forwarding.local.len(), 2);
    let db = &cfg.forwarding.local[0];
    assert_eq!((db.local_addr.as_str(), db.local_port), ("127.0.0.1", 5432));
    assert_eq!((db.remote_addr.as_str(), db.remote_port), ("db.internal", 5432));
    let v6 = &cfg.forwarding.local[1];
    assert_eq!((v6.local_addr.as_str(), v6.local_port), ("::1", 9090));

    assert_eq!(cfg.forwarding.remote.len(), 2);
    let web = &cfg.forwarding.remote[0];
    assert_eq!((web.remote_addr.as_str(), web.remote_port), ("0.0.0.0", 8080));
    assert_eq!((web.local_addr.as_str(), web.local_port), ("localhost", 3000));
    let bare = &cfg.forwarding.remote[1];
    assert_eq!((bare.remote_addr.as_str(), bare.remote_port), ("127.0.0.1", 6001));
    assert_eq!((bare.local_addr.as_str(), bare.local_port), ("127.0.0.1", 6001));

    assert_eq!(cfg.forwarding.policy, ForwardFailurePolicy::AllOrNothing);
    assert!(matches!(cfg.host_key_policy, HostKeyPolicy::InsecureAcceptAny));
    assert!(cfg.command.is_none());
}

#[test]
#[serial]
fn invalid_forward_spec_is_rejected() {
    match parse_tunnel(&["-R", "8080:localhost", "dev"]) {
        Err(err) => assert!(
            format!("{err:#}").contains("invalid remote forward spec"),
            "unexpected error: {err:#}"
        ),
        Ok(cfg) => panic!("expected remote forward error, got {:?}", cfg.forwarding),
    }
    match parse_tunnel(&["-L", "99999:db:5432", "dev"]) {
        Err(err) => assert!(format!("{err:#}").contains("port must be a valid number")),
        Ok(cfg) => panic!("expected port error, got {:?}", cfg.forwarding),
    }
}

#[test]
#[serial]
fn command_and_credentials() {
    let cfg = parse_tunnel(&["-l", "deploy", "--password", "hunter2", "-i", "/keys/id", "dev", "uname", "-a"]).expect("command");
    assert_eq!(cfg.username, "deploy");
    assert_eq!(cfg.password.as_ref().map(|p| p.expose_secret().to_string()), Some("hunter2".to_string()));
    assert_eq!(cfg.identities, vec![PathBuf::from("/keys/id")]);
    assert!(cfg.identity_passphrase.is_none());
    assert_eq!(cfg.command.as_deref(), Some("uname -a"));
}

#[test]
#[serial]
fn identity_passphrase_from_flag_or_env() {
    let cfg = parse_tunnel(&["-i", "/keys/id", "--identity-passphrase", "open sesame", "dev"]).expect("flag");
    assert_eq!(
        cfg.identity_passphrase.as_ref().map(|p| p.expose_secret().to_string()),
        Some("open sesame".to_string())
    );

    let cfg = parse_tunnel_with_env(&["-i", "/keys/id", "dev"], &[("DEVTUNNEL_IDENTITY_PASSPHRASE", Some("from-env"))])
        .expect("env");
    assert_eq!(
        cfg.identity_passphrase.as_ref().map(|p| p.expose_secret().to_string()),
        Some("from-env".to_string())
    );
}

#[test]
#[serial]
fn environment_supplies_user_and_password() {
    let cfg = parse_tunnel(&["dev"]).expect("defaults");
    assert_eq!(cfg.username, "root");
    assert!(cfg.password.is_none());

    let cfg = parse_tunnel_with_env(
        &["dev"],
        &[("DEVTUNNEL_USER", Some("ci")), ("DEVTUNNEL_PASSWORD", Some("from-env"))],
    )
    .expect("env defaults");
    assert_eq!(cfg.username, "ci");
    assert_eq!(cfg.password.as_ref().map(|p| p.expose_secret().to_string()), Some("from-env".to_string()));

    let cfg = parse_tunnel_with_env(&["-l", "flag", "dev"], &[("DEVTUNNEL_USER", Some("ci"))]).expect("flag wins");
    assert_eq!(cfg.username, "flag");
}

#[test]
#[serial]
fn host_key_options() {
    let cfg = parse_tunnel(&["--known-hosts", "dev"]).expect("known hosts default");
    assert!(matches!(cfg.host_key_policy, HostKeyPolicy::KnownHosts { path: None }));

    let cfg = parse_tunnel(&["--known-hosts=/tmp/kh", "dev"]).expect("known hosts path");
    match cfg.host_key_policy {
        HostKeyPolicy::KnownHosts { path } => assert_eq!(path, Some(PathBuf::from("/tmp/kh"))),
        other => panic!("unexpected policy {other:?}"),
    }

    let cfg = parse_tunnel(&["--fingerprint", "SHA256:abc", "dev"]).expect("fingerprint");
    assert!(matches!(cfg.host_key_policy, HostKeyPolicy::Fingerprint(ref value) if value == "SHA256:abc"));

    assert!(parse_tunnel(&["--known-hosts", "--fingerprint", "SHA256:abc", "dev"]).is_err());
}

#[test]
#[serial]
fn forward_policy_flags() {
    let cfg = parse_tunnel(&["--best-effort", "dev"]).expect("best effort");
    assert_eq!(cfg.forwarding.policy, ForwardFailurePolicy::BestEffort);

    let cfg = parse_tunnel(&["--forward-policy", "best-effort", "dev"]).expect("value enum");
    assert_eq!(cfg.forwarding.policy, ForwardFailurePolicy::BestEffort);

    let cfg = parse_tunnel(&["--forward-policy", "all-or-nothing", "dev"]).expect("value enum");
    assert_eq!(cfg.forwarding.policy, ForwardFailurePolicy::AllOrNothing);

    assert!(parse_tunnel(&["--best-effort", "--forward-policy", "all-or-nothing", "dev"]).is_err());
}

#[test]
#[serial]
fn keepalive_must_be_positive() {
    match parse_tunnel(&["--keepalive-interval", "0", "dev"]) {
        Err(err) => assert!(err.to_string().contains("greater than zero")),
        Ok(cfg) => panic!("expected error, got {:?}", cfg.keepalive_interval),
    }
    let cfg = parse_tunnel(&["--keepalive-interval", "15", "dev"]).expect("keepalive");
    assert_eq!(cfg.keepalive_interval, Some(std::time::Duration::from_secs(15)));
}

#[test]
#[serial]
fn hosts_mappings_require_a_section() {
    assert!(parse_tunnel(&["--host", "10.0.0.5=api.dev", "dev"]).is_err());

    let cfg = parse_tunnel(&[
        "--hosts-section",
        "devtunnel",
        "--host",
        "10.0.0.5=api.dev,web.dev",
        "--host",
        "[fd00::5]=db.dev",
        "dev",
    ])
    .expect("hosts mappings");
    let hosts = cfg.hosts.expect("hosts config");
    assert_eq!(hosts.section, "devtunnel");
    assert_eq!(
        hosts.entries,
        vec![
            ("10.0.0.5".to_string(), vec!["api.dev".to_string(), "web.dev".to_string()]),
            ("fd00::5".to_string(), vec!["db.dev".to_string()]),
        ]
    );

    match parse_tunnel(&["--hosts-section", "devtunnel", "--host", "db.internal=db.dev", "dev"]) {
        Err(err) => assert!(format!("{err:#}").contains("invalid address"), "unexpected error: {err:#}"),
        Ok(cfg) => panic!("expected address error, got {:?}", cfg.hosts),
    }
}

#[test]
#[serial]
fn hosts_subcommands_edit_a_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("hosts");
    fs::write(&path, "127.0.0.1 localhost\n")?;
    let file = path.to_str().ok_or_else(|| anyhow!("non-utf8 temp path"))?;

    run_hosts_cmd(&["hosts", "--hosts-file", file, "set", "dev", "10.0.0.5=web.dev,api.dev"])?;
    let nl = hosts_core::LineEnding::native().as_str();
    assert_eq!(
        fs::read_to_string(&path)?,
        format!("127.0.0.1 localhost{nl}{nl}# Start Section dev{nl}10.0.0.5 api.dev{nl}10.0.0.5 web.dev{nl}# End Section dev{nl}")
    );

    let shown = run_hosts_cmd(&["hosts", "show", "dev", "--hosts-file", file])?;
    assert_eq!(shown, "10.0.0.5 api.dev\n10.0.0.5 web.dev\n");

    run_hosts_cmd(&["hosts", "--hosts-file", file, "remove", "dev"])?;
    assert_eq!(fs::read_to_string(&path)?, format!("127.0.0.1 localhost{nl}"));
    Ok(())
}

#[test]
fn help_lists_subcommands() {
    let usage = Cli::command().render_help().to_string();
    assert!(usage.contains("tunnel"));
    assert!(usage.contains("hosts"));
}

fn run_hosts_cmd(args: &[&str]) -> Result<String> {
    let mut argv = vec!["devtunnel"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(&argv).map_err(|err| anyhow!(err.to_string()))?;
    let Command::Hosts(hosts) = cli.command else {
        return Err(anyhow!("expected hosts subcommand"));
    };
    let mut out = Vec::new();
    run_hosts(&hosts, &mut out)?;
    Ok(String::from_utf8(out)?)
}

fn parse_tunnel(args: &[&str]) -> Result<TunnelConfig> {
    parse_tunnel_with_env(args, &[])
}

fn parse_tunnel_with_env(args: &[&str], overrides: &[(&str, Option<&str>)]) -> Result<TunnelConfig> {
    with_clean_env(|| {
        for (key, value) in overrides {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }
        let mut argv = vec!["devtunnel", "tunnel"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(&argv).map_err(|err| anyhow!(err.to_string()))?;
        let Command::Tunnel(tunnel) = cli.command else {
            return Err(anyhow!("expected tunnel subcommand"));
        };
        TunnelConfig::try_from(tunnel)
    })
}

fn with_clean_env<T>(f: impl FnOnce() -> T) -> T {
    let saved: Vec<_> = ["DEVTUNNEL_USER", "DEVTUNNEL_PASSWORD", "DEVTUNNEL_IDENTITY_PASSPHRASE"]
        .into_iter()
        .map(|key| (key, env::var_os(key)))
        .collect();
    for (key, _) in &saved {
        unsafe { env::remove_var(key) };
    }
    let result = f();
    for (key, value) in saved {
        match value {
            Some(value) => unsafe { env::set_var(key, value) },
            None => unsafe { env::remove_var(key) },
        }
    }
    result
}
