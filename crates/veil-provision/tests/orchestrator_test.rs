//! End-to-end workflow tests over in-memory fakes
//!
//! The fakes share one journal so tests can assert ordering across the
//! command channel and the registry, not just within each.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::StreamExt;
use uuid::Uuid;

use veil_provision::probe::Probe;
use veil_provision::{provision, ProvisionEvent, ProvisioningRequest};
use veil_registry::{ClientRecord, NewClient, NewServer, ProxyRegistry, RegistryError};
use veil_ssh::{ChannelError, CommandChannel, Connector, ExecOutput, SshTarget};

const KEYGEN_OUTPUT: &str = "Private key: cP2ai8sJ4lQnqX0YVp3xGg\nPublic key: mK9bTf1yHw5eR7dNZs6uLa\n";

#[derive(Clone)]
struct HostBehavior {
    config_exists: bool,
    cleanup_fails: bool,
    keygen_output: String,
}

impl Default for HostBehavior {
    fn default() -> Self {
        Self {
            config_exists: false,
            cleanup_fails: false,
            keygen_output: KEYGEN_OUTPUT.to_string(),
        }
    }
}

/// Shared state observed by every fake in one test.
struct TestHost {
    behavior: HostBehavior,
    journal: Mutex<Vec<String>>,
    files: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl TestHost {
    fn new(behavior: HostBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            journal: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn files(&self) -> Vec<(String, String)> {
        self.files.lock().unwrap().clone()
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn ok(exit_status: u32, stdout: &str, stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_status,
    }
}

struct FakeChannel {
    host: Arc<TestHost>,
}

#[async_trait]
impl CommandChannel for FakeChannel {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, ChannelError> {
        self.host.record(format!("remote:{command}"));
        let behavior = &self.host.behavior;

        if command.starts_with("test -e") {
            let status = if behavior.config_exists { 0 } else { 1 };
            return Ok(ok(status, "", ""));
        }
        if command.starts_with("systemctl stop xray") {
            return Ok(if behavior.cleanup_fails {
                ok(1, "", "Failed to stop xray.service")
            } else {
                ok(0, "", "")
            });
        }
        if command.ends_with("x25519") {
            return Ok(ok(0, &behavior.keygen_output, ""));
        }
        Ok(ok(0, "", ""))
    }

    async fn write_file(&mut self, path: &str, contents: &str) -> Result<(), ChannelError> {
        self.host.record(format!("write:{path}"));
        self.host
            .files
            .lock()
            .unwrap()
            .push((path.to_string(), contents.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.host.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeConnector {
    host: Arc<TestHost>,
    fail: bool,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn CommandChannel>, ChannelError> {
        if self.fail {
            return Err(ChannelError::Connection(format!(
                "{}:{}: connection refused",
                target.host, target.port
            )));
        }
        Ok(Box::new(FakeChannel {
            host: self.host.clone(),
        }))
    }
}

struct FakeRegistry {
    host: Arc<TestHost>,
    existing_server_ids: Vec<i32>,
    next_id: AtomicI32,
}

impl FakeRegistry {
    fn new(host: Arc<TestHost>, existing_server_ids: Vec<i32>) -> Arc<Self> {
        Arc::new(Self {
            host,
            existing_server_ids,
            next_id: AtomicI32::new(1),
        })
    }
}

#[async_trait]
impl ProxyRegistry for FakeRegistry {
    async fn insert_server(&self, server: NewServer) -> Result<i32, RegistryError> {
        self.host
            .record(format!("registry:insert_server:{}", server.server_ip));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn insert_client(&self, server_id: i32, new: NewClient) -> Result<i32, RegistryError> {
        self.host
            .record(format!("registry:insert_client:{server_id}:{}", new.username));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn delete_servers_by_ip(&self, server_ip: &str) -> Result<Vec<i32>, RegistryError> {
        self.host
            .record(format!("registry:delete_servers_by_ip:{server_ip}"));
        Ok(self.existing_server_ids.clone())
    }

    async fn delete_clients_by_server_id(&self, server_id: i32) -> Result<u64, RegistryError> {
        self.host
            .record(format!("registry:delete_clients_by_server_id:{server_id}"));
        Ok(0)
    }

    async fn list_clients_by_server_id(
        &self,
        _server_id: i32,
    ) -> Result<Vec<ClientRecord>, RegistryError> {
        Ok(Vec::new())
    }
}

struct FakeProbe {
    host: Arc<TestHost>,
    result: bool,
}

#[async_trait]
impl Probe for FakeProbe {
    async fn verify(&self, host: &str, _mask_domain: &str) -> bool {
        self.host.record(format!("probe:{host}"));
        self.result
    }
}

fn request(overwrite: bool) -> ProvisioningRequest {
    ProvisioningRequest {
        server_ip: "203.0.113.7".to_string(),
        ssh_user: "root".to_string(),
        ssh_password: "hunter2".to_string(),
        ssh_port: 22,
        mask_domain: "cdn.example.com".to_string(),
        proxy_name: "edge-1".to_string(),
        overwrite,
    }
}

struct Run {
    host: Arc<TestHost>,
    events: Vec<ProvisionEvent>,
}

impl Run {
    fn tokens(&self) -> Vec<String> {
        self.events.iter().map(|e| e.token()).collect()
    }
}

async fn run_workflow(
    behavior: HostBehavior,
    req: ProvisioningRequest,
    existing_server_ids: Vec<i32>,
    connect_fails: bool,
    verified: bool,
) -> Run {
    let host = TestHost::new(behavior);
    let connector = Arc::new(FakeConnector {
        host: host.clone(),
        fail: connect_fails,
    });
    let registry = FakeRegistry::new(host.clone(), existing_server_ids);
    let probe = Arc::new(FakeProbe {
        host: host.clone(),
        result: verified,
    });

    let mut stream = provision(req, connector, registry, probe);
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }

    Run { host, events }
}

/// Every run: in-progress strictly before done per step, exactly one
/// terminal event, and it comes last.
fn assert_well_formed(events: &[ProvisionEvent]) {
    let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal_count, 1, "exactly one terminal event: {events:?}");
    assert!(events.last().unwrap().is_terminal(), "terminal event must be last");

    let mut seen_in_progress = Vec::new();
    for event in events {
        if let ProvisionEvent::Status { step, phase } = event {
            match phase {
                veil_provision::Phase::InProgress => seen_in_progress.push(*step),
                veil_provision::Phase::Done => {
                    assert!(
                        seen_in_progress.contains(step),
                        "done without in-progress for {step}"
                    );
                }
            }
        }
    }
}

#[tokio::test]
async fn fresh_host_runs_the_full_sequence() {
    let run = run_workflow(HostBehavior::default(), request(false), vec![], false, true).await;
    assert_well_formed(&run.events);

    let tokens = run.tokens();
    let expected_prefix = [
        "status:connect:inprogress",
        "status:connect:done",
        "status:check:inprogress",
        "status:check:done",
        "status:install:inprogress",
        "status:install:done",
        "status:keys:inprogress",
        "status:keys:done",
        "status:config:inprogress",
        "status:config:done",
        "status:verify:inprogress",
        "status:verify:done",
        "status:done:inprogress",
        "status:done:done",
    ];
    let prefix: Vec<&str> = tokens[..expected_prefix.len()]
        .iter()
        .map(|t| t.as_str())
        .collect();
    assert_eq!(prefix, expected_prefix);

    let terminal = tokens.last().unwrap();
    assert!(terminal.starts_with("result:"), "got {terminal}");
    let body: serde_json::Value = serde_json::from_str(&terminal["result:".len()..]).unwrap();
    let link = body["vless_link"].as_str().unwrap();
    assert!(link.starts_with("vless://"));
    assert!(link.contains("@203.0.113.7:443/"));
    assert!(link.contains("&security=reality&"));
    assert!(link.contains("&sni=cdn.example.com&"));
    assert!(link.contains("&pbk=mK9bTf1yHw5eR7dNZs6uLa&"));
    assert!(link.ends_with("#edge-1"));
    assert!(!body["qr_code"].as_str().unwrap().is_empty());

    // The embedded client id is the one persisted
    let id_part = link
        .strip_prefix("vless://")
        .unwrap()
        .split('@')
        .next()
        .unwrap();
    assert!(Uuid::parse_str(id_part).is_ok());

    // Config was uploaded to the fixed path before the restart
    let files = run.host.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].0, "/usr/local/etc/xray/config.json");
    assert!(files[0].1.contains("\"privateKey\": \"cP2ai8sJ4lQnqX0YVp3xGg\""));

    // Persist happened after verification, server before client
    let journal = run.host.journal();
    let probe_at = journal.iter().position(|e| e.starts_with("probe:")).unwrap();
    let server_at = journal
        .iter()
        .position(|e| e.starts_with("registry:insert_server"))
        .unwrap();
    let client_at = journal
        .iter()
        .position(|e| e.starts_with("registry:insert_client"))
        .unwrap();
    assert!(probe_at < server_at);
    assert!(server_at < client_at);

    assert!(run.host.closed());
}

#[tokio::test]
async fn existing_install_without_overwrite_short_circuits() {
    let behavior = HostBehavior {
        config_exists: true,
        ..Default::default()
    };
    let run = run_workflow(behavior, request(false), vec![], false, true).await;
    assert_well_formed(&run.events);

    assert_eq!(
        run.tokens(),
        vec![
            "status:connect:inprogress",
            "status:connect:done",
            "status:check:inprogress",
            "error:exists",
        ]
    );

    // Zero destructive operations: nothing installed, nothing generated,
    // nothing uploaded, no registry rows touched.
    let journal = run.host.journal();
    assert!(!journal.iter().any(|e| e.contains("install-release.sh")));
    assert!(!journal.iter().any(|e| e.contains("x25519")));
    assert!(!journal.iter().any(|e| e.contains("apt-get")));
    assert!(!journal.iter().any(|e| e.starts_with("registry:")));
    assert!(!journal.iter().any(|e| e.starts_with("write:")));

    assert!(run.host.closed());
}

#[tokio::test]
async fn overwrite_purges_local_rows_before_any_install_step() {
    let behavior = HostBehavior {
        config_exists: true,
        cleanup_fails: true,
        ..Default::default()
    };
    let run = run_workflow(behavior, request(true), vec![7, 8], false, true).await;
    assert_well_formed(&run.events);

    // Remote cleanup failed, the run still completes (scenario C)
    let tokens = run.tokens();
    assert!(tokens.contains(&"status:cleanup:inprogress".to_string()));
    assert!(tokens.contains(&"status:cleanup:done".to_string()));
    assert!(tokens.contains(&"status:install:inprogress".to_string()));
    assert!(tokens.last().unwrap().starts_with("result:"));

    let journal = run.host.journal();
    let purge_at = journal
        .iter()
        .position(|e| e.starts_with("registry:delete_servers_by_ip"))
        .unwrap();
    let install_at = journal
        .iter()
        .position(|e| e.contains("install-release.sh"))
        .unwrap();
    assert!(purge_at < install_at, "local purge must precede remote install");

    // Dependent clients of both stale rows were purged too
    assert!(journal.contains(&"registry:delete_clients_by_server_id:7".to_string()));
    assert!(journal.contains(&"registry:delete_clients_by_server_id:8".to_string()));
}

#[tokio::test]
async fn unrecognizable_keygen_output_aborts_before_upload() {
    let behavior = HostBehavior {
        keygen_output: "xray 1.8.4 (go1.21)\n".to_string(),
        ..Default::default()
    };
    let run = run_workflow(behavior, request(false), vec![], false, true).await;
    assert_well_formed(&run.events);

    assert_eq!(
        run.tokens().last().unwrap(),
        "error:Failed to generate keys"
    );
    assert!(run.host.files().is_empty(), "no config upload after key failure");
    assert!(!run
        .host
        .journal()
        .iter()
        .any(|e| e.starts_with("registry:insert")));
    assert!(run.host.closed());
}

#[tokio::test]
async fn connect_failure_is_a_single_terminal_error() {
    let run = run_workflow(HostBehavior::default(), request(false), vec![], true, true).await;
    assert_well_formed(&run.events);

    let tokens = run.tokens();
    assert_eq!(tokens[0], "status:connect:inprogress");
    assert!(tokens[1].starts_with("error:Failed to connect to"));
    assert_eq!(tokens.len(), 2);
}

#[tokio::test]
async fn failed_verification_never_persists() {
    let run = run_workflow(HostBehavior::default(), request(false), vec![], false, false).await;
    assert_well_formed(&run.events);

    let terminal = run.tokens().last().unwrap().clone();
    assert!(terminal.starts_with("error:Proxy verification failed"));

    let journal = run.host.journal();
    assert!(!journal.iter().any(|e| e.starts_with("registry:insert")));
    assert!(run.host.closed());
}

#[tokio::test]
async fn dropping_the_consumer_still_releases_the_session() {
    let host = TestHost::new(HostBehavior::default());
    let connector = Arc::new(FakeConnector {
        host: host.clone(),
        fail: false,
    });
    let registry = FakeRegistry::new(host.clone(), vec![]);
    let probe = Arc::new(FakeProbe {
        host: host.clone(),
        result: true,
    });

    let mut stream = provision(request(false), connector, registry, probe);
    let first = stream.next().await.unwrap();
    assert_eq!(first.token(), "status:connect:inprogress");
    drop(stream);

    // The workflow keeps running detached; the close obligation is its own.
    for _ in 0..50 {
        if host.closed() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session was not released after consumer went away");
}
