//! Fixed remote command set
//!
//! Parameterized only by remote paths and counter/user names. The install
//! commands are idempotent (check-then-install, and the upstream installer
//! handles an already-installed daemon), so re-running against a partially
//! provisioned host is safe.

use veil_xray::{config::REALITY_INBOUND_TAG, CONFIG_PATH, LOG_DIR, STATS_SERVER, XRAY_BIN};

/// Install curl unless it is already present.
pub const CHECK_CURL: &str =
    "command -v curl >/dev/null 2>&1 || (apt-get update && apt-get install -y curl)";

/// Upstream installer for the daemon.
pub const INSTALL_XRAY: &str = r#"bash -c "$(curl -L https://github.com/XTLS/Xray-install/raw/main/install-release.sh)" @ install"#;

pub fn prepare_log_dir() -> String {
    format!("mkdir -p {LOG_DIR}")
}

pub fn keygen() -> String {
    format!("{XRAY_BIN} x25519")
}

pub fn restart() -> String {
    "systemctl restart xray".to_string()
}

pub fn status() -> String {
    "systemctl status xray".to_string()
}

/// Tear down an existing install: stop the daemon, drop its config and
/// logs. Run best-effort; a dirty host is reinstalled over.
pub fn cleanup() -> String {
    format!("systemctl stop xray; rm -f {CONFIG_PATH}; rm -rf {LOG_DIR}")
}

/// Query or reset one traffic counter through the stats API.
pub fn stat_query(counter: &str, reset: bool) -> String {
    format!("{XRAY_BIN} api stats --server={STATS_SERVER} -name '{counter}' -reset={reset}")
}

/// Add a user to the live inbound from an uploaded wrapper document.
pub fn add_user(wrapper_path: &str) -> String {
    format!("{XRAY_BIN} api adu --server={STATS_SERVER} {wrapper_path}")
}

/// Remove a user from the live inbound by label.
pub fn remove_user(username: &str) -> String {
    format!("{XRAY_BIN} api rmu --server={STATS_SERVER} -tag={REALITY_INBOUND_TAG} {username}")
}

pub fn remove_file(path: &str) -> String {
    format!("rm -f '{path}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_embed_the_fixed_paths() {
        assert_eq!(keygen(), "/usr/local/bin/xray x25519");
        assert_eq!(prepare_log_dir(), "mkdir -p /var/log/xray");
        assert_eq!(
            cleanup(),
            "systemctl stop xray; rm -f /usr/local/etc/xray/config.json; rm -rf /var/log/xray"
        );
    }

    #[test]
    fn stat_query_quotes_the_counter_name() {
        assert_eq!(
            stat_query("user>>>user1>>>traffic>>>uplink", false),
            "/usr/local/bin/xray api stats --server=127.0.0.1:8081 -name 'user>>>user1>>>traffic>>>uplink' -reset=false"
        );
    }

    #[test]
    fn user_management_targets_the_reality_inbound() {
        assert_eq!(
            add_user("/tmp/user_x.json"),
            "/usr/local/bin/xray api adu --server=127.0.0.1:8081 /tmp/user_x.json"
        );
        assert_eq!(
            remove_user("alice"),
            "/usr/local/bin/xray api rmu --server=127.0.0.1:8081 -tag=reality-in alice"
        );
    }
}
