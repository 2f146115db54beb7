//! End-to-end tests driving sessions through the registry, the way the CLI
//! does: create through config, start, send commands, drain output, delete.

use std::time::Duration;

use tempfile::TempDir;

use shellmux::{Config, Session, SessionError, SessionRegistry};

fn test_config(max_sessions: usize) -> Config {
    let mut config = Config::default();
    config.manager.max_sessions = max_sessions;
    config.shell.program = "/bin/sh".to_string();
    config
}

/// Polls a pipe session's queue until `needle` shows up or attempts run out.
#[cfg(unix)]
async fn wait_for_pipe_output(session: &mut Session, needle: &str) -> String {
    let mut collected = String::new();
    for _ in 0..50 {
        if let Session::Pipe(pipe) = &mut *session {
            collected.push_str(&pipe.get_output());
        }
        if collected.contains(needle) {
            return collected;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!(
        "Timed out waiting for output containing {:?}; got {:?}",
        needle, collected
    );
}

// ===== Session lifecycle =====

#[cfg(unix)]
#[tokio::test]
async fn test_full_pipe_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let registry = SessionRegistry::from_config(&test_config(4));

    let handle = registry
        .create_session("workspace", temp_dir.path(), false)
        .unwrap();

    {
        let mut session = handle.lock().await;
        session.start().await.unwrap();
        assert!(session.is_running());

        session.send_command("echo flow_marker").await.unwrap();
        let output = wait_for_pipe_output(&mut session, "flow_marker").await;
        assert!(output.contains("flow_marker\n"));
    }

    registry.delete_session("workspace").await.unwrap();
    assert_eq!(registry.count(), 0);
    assert!(registry.get_session("workspace").is_none());
    assert!(!handle.lock().await.is_running());
}

#[tokio::test]
async fn test_capacity_with_turnover() {
    let temp_dir = TempDir::new().unwrap();
    let registry = SessionRegistry::from_config(&test_config(2));

    registry
        .create_session("a", temp_dir.path(), false)
        .unwrap();
    registry
        .create_session("b", temp_dir.path(), false)
        .unwrap();

    let result = registry.create_session("c", temp_dir.path(), false);
    assert!(matches!(
        result,
        Err(SessionError::CapacityExceeded { max: 2 })
    ));

    registry.delete_session("a").await.unwrap();
    registry
        .create_session("c", temp_dir.path(), false)
        .unwrap();

    let mut ids = registry.list_sessions();
    ids.sort();
    assert_eq!(ids, vec!["b", "c"]);
}

#[tokio::test]
async fn test_duplicate_id_leaves_registry_intact() {
    let temp_dir = TempDir::new().unwrap();
    let registry = SessionRegistry::from_config(&test_config(4));

    registry
        .create_session("only", temp_dir.path(), false)
        .unwrap();
    let result = registry.create_session("only", temp_dir.path(), true);
    assert!(matches!(result, Err(SessionError::DuplicateId(_))));

    assert_eq!(registry.count(), 1);
    let handle = registry.get_session("only").unwrap();
    assert!(!handle.lock().await.is_interactive());
}

#[tokio::test]
async fn test_missing_working_dir_fails_before_spawn() {
    let temp_dir = TempDir::new().unwrap();
    let registry = SessionRegistry::from_config(&test_config(4));

    let missing = temp_dir.path().join("not-here");
    let handle = registry.create_session("lost", &missing, false).unwrap();

    let mut session = handle.lock().await;
    let result = session.start().await;
    assert!(matches!(result, Err(SessionError::WorkingDirNotFound(_))));
    assert!(!session.is_running());
}

#[tokio::test]
async fn test_delete_missing_session() {
    let registry = SessionRegistry::from_config(&test_config(4));

    let result = registry.delete_session("ghost").await;
    assert!(matches!(result, Err(SessionError::NotFound(_))));
}

// ===== Output stream =====

#[cfg(unix)]
#[tokio::test]
async fn test_clear_screen_marker_leads_output() {
    use shellmux::session::CLEAR_SCREEN_MARKER;

    let temp_dir = TempDir::new().unwrap();
    let registry = SessionRegistry::from_config(&test_config(4));
    let handle = registry
        .create_session("screen", temp_dir.path(), false)
        .unwrap();

    let mut session = handle.lock().await;
    session.start().await.unwrap();
    session.send_command("clear").await.unwrap();

    let output = wait_for_pipe_output(&mut session, CLEAR_SCREEN_MARKER).await;
    assert!(output.starts_with(CLEAR_SCREEN_MARKER));

    session.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_output_arrives_in_send_order() {
    let temp_dir = TempDir::new().unwrap();
    let registry = SessionRegistry::from_config(&test_config(4));
    let handle = registry
        .create_session("ordered", temp_dir.path(), false)
        .unwrap();

    let mut session = handle.lock().await;
    session.start().await.unwrap();

    session.send_command("echo first_marker").await.unwrap();
    let first = wait_for_pipe_output(&mut session, "first_marker").await;
    assert!(!first.contains("second_marker"));

    session.send_command("echo second_marker").await.unwrap();
    let second = wait_for_pipe_output(&mut session, "second_marker").await;
    assert!(second.contains("second_marker"));

    session.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_stderr_joins_the_stream() {
    let temp_dir = TempDir::new().unwrap();
    let registry = SessionRegistry::from_config(&test_config(4));
    let handle = registry
        .create_session("noisy", temp_dir.path(), false)
        .unwrap();

    let mut session = handle.lock().await;
    session.start().await.unwrap();
    session.send_command("echo err_marker 1>&2").await.unwrap();

    let output = wait_for_pipe_output(&mut session, "err_marker").await;
    assert!(output.contains("err_marker\n"));

    session.stop().await;
}

// ===== Interactive sessions =====

#[cfg(unix)]
#[tokio::test]
async fn test_pty_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let registry = SessionRegistry::from_config(&test_config(4));

    let handle = registry
        .create_session("terminal", temp_dir.path(), true)
        .unwrap();

    {
        let mut session = handle.lock().await;
        assert!(session.is_interactive());
        session.start().await.unwrap();
        session.send_command("echo pty_flow_marker").await.unwrap();

        let mut collected = String::new();
        for _ in 0..50 {
            if let Session::Pty(pty) = &mut *session {
                let chunk = pty
                    .read_output(Some(Duration::from_millis(100)))
                    .await
                    .unwrap_or_default();
                collected.push_str(&chunk);
            }
            if collected.contains("pty_flow_marker") {
                break;
            }
        }
        assert!(
            collected.contains("pty_flow_marker"),
            "missing marker in {:?}",
            collected
        );
    }

    registry.delete_session("terminal").await.unwrap();
    assert_eq!(registry.count(), 0);
}
