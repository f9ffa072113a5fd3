use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::{NamedTempFile, TempDir};

/// Creates a config file that uses the in-process cache, so no Redis is needed.
fn create_memory_config() -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(
        config.path(),
        b"source:\n  bucket: legacy-uploads\n  prefix: media/\ndestination:\n  bucket: new-uploads\ncache:\n  url: \"memory://\"\n",
    )
    .expect("Writing temp config failed");
    config
}

/// A command isolated from any `.env` in the working directory.
fn bucket_migrate(workdir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("bucket-migrate").expect("Binary exists");
    cmd.current_dir(workdir.path())
        .env_remove("REDIS_URL")
        .env_remove("DEST_ACCESS_KEY_ID")
        .env_remove("DEST_SECRET_ACCESS_KEY");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let workdir = TempDir::new().unwrap();
    bucket_migrate(&workdir)
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("migrate")
                .and(predicate::str::contains("audit"))
                .and(predicate::str::contains("forget")),
        );
}

#[test]
fn migrate_fails_for_missing_config_file() {
    let workdir = TempDir::new().unwrap();
    bucket_migrate(&workdir)
        .args(["migrate", "--config", "does-not-exist.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn migrate_requires_destination_credentials() {
    let workdir = TempDir::new().unwrap();
    let config = create_memory_config();
    bucket_migrate(&workdir)
        .arg("migrate")
        .arg("--config")
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("DEST_ACCESS_KEY_ID"));
}

#[test]
fn audit_with_memory_cache_reports_no_records() {
    let workdir = TempDir::new().unwrap();
    let config = create_memory_config();
    bucket_migrate(&workdir)
        .arg("audit")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0 transfer record(s)"));
}

#[test]
fn audit_json_prints_an_array() {
    let workdir = TempDir::new().unwrap();
    let config = create_memory_config();
    bucket_migrate(&workdir)
        .arg("audit")
        .arg("--config")
        .arg(config.path())
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("["));
}

#[test]
fn forget_with_memory_cache_succeeds() {
    let workdir = TempDir::new().unwrap();
    let config = create_memory_config();
    bucket_migrate(&workdir)
        .arg("forget")
        .arg("--config")
        .arg(config.path())
        .args(["--fingerprint", "abc123"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Forgot abc123"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        use std::fmt::Write as FmtWrite;
        let mut msg = String::new();
        let _ = write!(&mut msg, "{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use bucket_migrate::cli::{run, Cli, Commands};

    // A dummy path: the command fails after the event has been emitted.
    let cli = Cli {
        command: Commands::Audit {
            config: std::path::PathBuf::from("dummy.yaml"),
            json: false,
        },
    };

    let result = run(cli).await;
    assert!(result.is_err());

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
