use chrono::Utc;
use serde_json::{json, Value};

use hostbridge::audit::Outcome;
use hostbridge::command::{CommandRequest, CommandResponse};
use hostbridge::daemon::{Daemon, PairRequest, ResolveRequest};
use hostbridge::policy::PolicyConfig;
use hostbridge::ErrorCode;
use hostbridge_core::Paths;

const SITE: &str = "claude.ai";

struct Session {
    daemon: Daemon,
    token: String,
    site_key: String,
}

impl Session {
    async fn send(&self, command: &str, trace_id: &str, args: Value) -> CommandResponse {
        let req = CommandRequest {
            command: command.to_string(),
            trace_id: trace_id.to_string(),
            site: SITE.to_string(),
            args,
        };
        self.daemon
            .handle(req, Some(&self.token), Some(&self.site_key))
            .await
    }

    /// Send a gated command, approve the prompt it raises, then retry
    async fn send_approved(&self, command: &str, trace_id: &str, args: Value) -> CommandResponse {
        let first = self.send(command, trace_id, args.clone()).await;
        assert_eq!(
            first.error_code,
            Some(ErrorCode::WriteConfirmationRequired),
            "{:?}",
            first
        );
        let id = first.data.unwrap()["confirmationId"]
            .as_str()
            .unwrap()
            .to_string();

        self.daemon
            .resolve_confirmation(&ResolveRequest {
                id: id.clone(),
                approved: true,
                always_allow: false,
            })
            .await
            .unwrap();

        let mut retry = args;
        retry["confirmationId"] = json!(id);
        self.send(command, trace_id, retry).await
    }
}

#[tokio::test]
async fn pair_read_move_remove() {
    let state = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();

    let mut policy = PolicyConfig {
        roots: vec![root.path().to_string_lossy().to_string()],
        ..PolicyConfig::default()
    };
    policy.mutations.rm_enabled = true;
    policy.mutations.mv_enabled = true;
    policy.auth.require_site_key = true;

    let daemon = Daemon::with_policy(&Paths::with_root(state.path()), policy)
        .await
        .unwrap();

    // pairing
    let (code, _) = daemon.pair_code();
    let paired = daemon
        .pair(&PairRequest {
            code: code.clone(),
            site: SITE.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(paired.token.len(), 48);
    let replay = daemon
        .pair(&PairRequest {
            code,
            site: SITE.to_string(),
        })
        .await;
    assert!(replay.is_err());

    let session = Session {
        daemon,
        token: paired.token,
        site_key: paired.site_key,
    };

    // read with redaction
    let original = root.path().join("config.ini");
    std::fs::write(&original, "[db]\nhost = localhost\npassword = s3cr3t\n").unwrap();

    let read = session
        .send("fs.read", "e2e-read", json!({"path": original.to_string_lossy()}))
        .await;
    assert!(read.ok, "{:?}", read);
    let content = read.data.as_ref().unwrap()["content"].as_str().unwrap();
    assert!(content.contains("password = ***REDACTED***"));
    assert!(!content.contains("s3cr3t"));
    assert!(content.contains("host = localhost"));

    // move
    let moved = root.path().join("config.bak");
    let mv = session
        .send_approved(
            "fs.mv",
            "e2e-mv",
            json!({"from": original.to_string_lossy(), "to": moved.to_string_lossy()}),
        )
        .await;
    assert!(mv.ok, "{:?}", mv);
    assert!(!original.exists());
    assert!(moved.exists());

    // remove
    let rm = session
        .send_approved("fs.rm", "e2e-rm", json!({"path": moved.to_string_lossy()}))
        .await;
    assert!(rm.ok, "{:?}", rm);
    assert!(!moved.exists());
    assert!(!original.exists());

    // every step landed in today's audit log under its trace id
    let entries = session
        .daemon
        .audit()
        .read_day(Utc::now().date_naive())
        .await
        .unwrap();
    for trace in ["e2e-read", "e2e-mv", "e2e-rm"] {
        assert!(
            entries
                .iter()
                .any(|e| e.trace_id == trace && e.outcome == Outcome::Ok),
            "no ok entry for {}",
            trace
        );
    }
    let confirmed_rm = entries
        .iter()
        .find(|e| e.trace_id == "e2e-rm" && e.outcome == Outcome::Ok)
        .unwrap();
    assert_eq!(confirmed_rm.user_confirmed, Some(true));
    assert!(entries
        .iter()
        .any(|e| e.trace_id == "e2e-rm" && e.error_code == Some(ErrorCode::WriteConfirmationRequired)));
}

#[tokio::test]
async fn outside_root_is_blocked_and_audited() {
    let state = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret.txt"), "nope").unwrap();

    let policy = PolicyConfig {
        roots: vec![root.path().to_string_lossy().to_string()],
        ..PolicyConfig::default()
    };
    let daemon = Daemon::with_policy(&Paths::with_root(state.path()), policy)
        .await
        .unwrap();
    let (code, _) = daemon.pair_code();
    let paired = daemon
        .pair(&PairRequest {
            code,
            site: SITE.to_string(),
        })
        .await
        .unwrap();
    let session = Session {
        daemon,
        token: paired.token,
        site_key: paired.site_key,
    };

    let escape = format!("{}/../{}", root.path().display(), "etc/passwd");
    for path in [
        outside.path().join("secret.txt").to_string_lossy().to_string(),
        escape,
        root.path().join(".env").to_string_lossy().to_string(),
    ] {
        let response = session.send("fs.read", "blocked", json!({"path": path})).await;
        assert_eq!(response.error_code, Some(ErrorCode::PolicyBlocked), "{}", path);
    }

    let entries = session
        .daemon
        .audit()
        .read_day(Utc::now().date_naive())
        .await
        .unwrap();
    assert_eq!(
        entries
            .iter()
            .filter(|e| e.trace_id == "blocked" && e.outcome == Outcome::Error)
            .count(),
        3
    );
}
