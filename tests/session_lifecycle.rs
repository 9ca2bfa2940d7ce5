//! End-to-end session tests against real child processes

#![cfg(unix)]

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bufterm::{
    strip_continuation, Config, Error, OpenRequest, SessionCommand, SessionEventKind,
    SessionManager, Target, TextBuffer, WordDirection,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn manager() -> SessionManager {
    SessionManager::new(Config::default())
}

fn request(cmd: &[&str]) -> OpenRequest {
    OpenRequest {
        cwd: Some(std::env::temp_dir()),
        ..OpenRequest::command(cmd.iter().copied())
    }
}

/// Pump events, rendering on each notification, until the surface exits
fn run_to_exit(manager: &mut SessionManager, surface: u64, buffer: &mut TextBuffer) -> Option<u32> {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        for event in manager.poll_events(Duration::from_millis(50)) {
            match event.kind {
                SessionEventKind::RenderReady => manager.render(event.surface, buffer).unwrap(),
                SessionEventKind::Exited(code) if event.surface == surface => {
                    manager.render(surface, buffer).unwrap();
                    return code;
                }
                _ => {}
            }
        }
    }
    panic!("surface {} did not exit", surface);
}

/// Pump events until the buffer shows `needle`
fn wait_for(manager: &mut SessionManager, surface: u64, buffer: &mut TextBuffer, needle: &str) {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        manager.poll_events(Duration::from_millis(50));
        manager.render(surface, buffer).unwrap();
        if buffer.text().contains(needle) {
            return;
        }
    }
    panic!("{:?} never appeared in {:?}", needle, buffer.text());
}

#[test]
fn echo_renders_then_goes_dead() {
    let mut manager = manager();
    let session = manager.open(1, request(&["/bin/echo", "hi"]), 24, 80).unwrap();
    let mut buffer = TextBuffer::new(24);

    assert_eq!(run_to_exit(&mut manager, 1, &mut buffer), Some(0));
    assert_eq!(buffer.lines()[0], "hi");
    assert!(!session.is_alive());

    // Writes after death are silently dropped
    manager
        .dispatch(&Target::Surface(1), SessionCommand::SendString("more\n".into()))
        .unwrap();
    manager
        .dispatch(
            &Target::Surface(1),
            SessionCommand::SendKey {
                key: "enter".into(),
                modifiers: Default::default(),
            },
        )
        .unwrap();
    manager
        .dispatch(&Target::Surface(1), SessionCommand::DeleteWord(WordDirection::Backward))
        .unwrap();
}

#[test]
fn missing_cwd_fails_without_spawning() {
    let mut manager = manager();
    let dir = tempfile::tempdir().unwrap();
    // Any process that did start would leave this file behind
    let marker = dir.path().join("spawned");
    let request = OpenRequest {
        cwd: Some(dir.path().join("does-not-exist")),
        ..OpenRequest::command([
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("touch '{}'", marker.display()),
        ])
    };

    let result = manager.open(1, request, 24, 80);
    assert!(matches!(result, Err(Error::Configuration(_))));
    assert!(manager.registry().is_empty());
    assert!(manager.poll_events(Duration::from_millis(300)).is_empty());
    assert!(!marker.exists());
}

#[test]
fn missing_executable_is_spawn_error() {
    let mut manager = manager();
    let result = manager.open(1, request(&["/nonexistent/bufterm-test-binary"]), 24, 80);
    assert!(matches!(result, Err(Error::Spawn(_))));
    assert!(manager.registry().is_empty());
}

#[test]
fn cat_round_trip_and_close() {
    let mut manager = manager();
    let session = manager.open(1, request(&["/bin/cat"]), 24, 80).unwrap();
    let mut buffer = TextBuffer::new(24);

    manager
        .dispatch(&Target::Surface(1), SessionCommand::SendString("marco\n".into()))
        .unwrap();
    wait_for(&mut manager, 1, &mut buffer, "marco");

    manager
        .dispatch(&Target::Surface(1), SessionCommand::Close)
        .unwrap();
    assert!(!session.is_alive());
    assert!(manager.registry().is_empty());

    // A second close goes nowhere
    let again = manager.dispatch(&Target::Surface(1), SessionCommand::Close);
    assert!(matches!(again, Err(Error::RegistryMiss(_))));
    session.close();
}

#[test]
fn bracketed_paste_is_echoed_with_markers() {
    let mut manager = manager();
    manager.open(1, request(&["/bin/cat", "-v"]), 24, 80).unwrap();
    let mut buffer = TextBuffer::new(24);

    manager
        .dispatch(
            &Target::Surface(1),
            SessionCommand::Paste {
                text: "pasted".into(),
                bracketed: true,
            },
        )
        .unwrap();
    manager
        .dispatch(&Target::Surface(1), SessionCommand::SendString("\n".into()))
        .unwrap();
    // cat -v shows ESC as ^[
    wait_for(&mut manager, 1, &mut buffer, "^[[200~pasted^[[201~");
}

#[test]
fn tag_lookup_prefers_latest() {
    let mut manager = manager();
    let mut first = request(&["/bin/cat"]);
    first.tag = Some("work".into());
    let mut second = request(&["/bin/cat"]);
    second.tag = Some("work".into());

    manager.open(1, first, 24, 80).unwrap();
    manager.open(2, second, 24, 80).unwrap();
    assert_eq!(manager.find(&Target::Tag("work".into())).unwrap().surface(), 2);

    manager.surface_destroyed(2);
    assert_eq!(manager.find(&Target::Tag("work".into())).unwrap().surface(), 1);
    manager.close_all();
    assert!(manager.find(&Target::Tag("work".into())).is_err());
}

#[test]
fn soft_wrap_copies_without_newline() {
    let mut manager = manager();
    let mut buffer = TextBuffer::new(5);
    manager
        .open(1, request(&["/bin/echo", "abcdefghijkl"]), 5, 10)
        .unwrap();
    run_to_exit(&mut manager, 1, &mut buffer);

    // The display carries the marker; stripping it rejoins the line
    assert_eq!(strip_continuation(&buffer.lines()[..2].join("\n")), "abcdefghijkl");

    manager
        .dispatch(
            &Target::Surface(1),
            SessionCommand::Select {
                start: (0, 0),
                end: (1, 1),
            },
        )
        .unwrap();
    let copied = manager
        .dispatch(&Target::Surface(1), SessionCommand::Copy)
        .unwrap();
    assert_eq!(copied.as_deref(), Some("abcdefghijkl"));
    assert_eq!(manager.clipboard().latest(), Some("abcdefghijkl"));
}

#[test]
fn reopened_surface_hides_old_session_exit() {
    let mut manager = manager();
    let old = manager.open(1, request(&["/bin/cat"]), 24, 80).unwrap();
    let new = manager.open(1, request(&["/bin/cat"]), 24, 80).unwrap();
    assert!(!old.is_alive());
    assert_ne!(old.serial(), new.serial());

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        for event in manager.poll_events(Duration::from_millis(50)) {
            assert_eq!(event.session, new.serial(), "{:?}", event);
            assert!(!matches!(event.kind, SessionEventKind::Exited(_)));
        }
    }
    assert!(new.is_alive());
    assert_eq!(manager.find(&Target::Surface(1)).unwrap().serial(), new.serial());
}

#[test]
fn output_after_resize_is_announced() {
    let mut manager = manager();
    manager.open(1, request(&["/bin/cat"]), 24, 80).unwrap();
    manager
        .dispatch(&Target::Surface(1), SessionCommand::Resize { rows: 20, cols: 70 })
        .unwrap();
    manager
        .dispatch(&Target::Surface(1), SessionCommand::SendString("hello\n".into()))
        .unwrap();

    // Render only when told to, the way a host does
    let mut buffer = TextBuffer::new(20);
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline && !buffer.text().contains("hello") {
        for event in manager.poll_events(Duration::from_millis(50)) {
            if event.kind == SessionEventKind::RenderReady {
                manager.render(event.surface, &mut buffer).unwrap();
            }
        }
    }
    assert!(buffer.text().contains("hello"), "{:?}", buffer.text());
}

#[test]
fn profile_env_and_request_env_reach_child() {
    let config: Config = toml::from_str(
        r#"
[[shell_configs]]
name = "Env"
cmd = ["/bin/sh", "-c", "echo $FROM_PROFILE-$FROM_REQUEST-$TERM"]

[shell_configs.env]
FROM_PROFILE = "p"
FROM_REQUEST = "overridden"
"#,
    )
    .unwrap();
    let mut manager = SessionManager::new(config);
    let mut env = BTreeMap::new();
    env.insert("FROM_REQUEST".to_string(), "r".to_string());
    let request = OpenRequest {
        config_name: Some("Env".into()),
        cwd: Some(std::env::temp_dir()),
        env,
        ..OpenRequest::default()
    };

    let session = manager.open(1, request, 24, 80).unwrap();
    assert_eq!(session.title(), "Env");
    let mut buffer = TextBuffer::new(24);
    run_to_exit(&mut manager, 1, &mut buffer);
    assert_eq!(buffer.lines()[0], "p-r-linux");
}

#[test]
fn resize_reaches_the_child() {
    let mut manager = manager();
    manager
        .open(1, request(&["/bin/sh", "-c", "read x; stty size"]), 24, 80)
        .unwrap();
    manager
        .dispatch(&Target::Surface(1), SessionCommand::Resize { rows: 30, cols: 100 })
        .unwrap();
    manager
        .dispatch(&Target::Surface(1), SessionCommand::SendString("\n".into()))
        .unwrap();

    let mut buffer = TextBuffer::new(30);
    run_to_exit(&mut manager, 1, &mut buffer);
    assert!(buffer.text().contains("30 100"), "{:?}", buffer.text());
}
