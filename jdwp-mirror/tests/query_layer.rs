// Query-layer integration tests against the in-process mock VM.

use jdwp_mirror::commands::command_sets;
use jdwp_mirror::mock::{MockClass, MockField, MockFrame, MockMethod, MockThread, MockVm, MockVmConfig};
use jdwp_mirror::types::{tags, Location, ThreadStatus, Value, Variable};
use jdwp_mirror::{JdwpConnection, JdwpError};
use std::collections::HashMap;
use std::sync::Arc;

const MAIN_CLASS: u64 = 100;
const WORK_METHOD: u64 = 200;
const MAIN_THREAD: u64 = 1;
const RUNNING_THREAD: u64 = 2;
const TOP_FRAME: u64 = 10;
const CALLER_FRAME: u64 = 11;
const MONITOR_OBJECT: u64 = 700;

fn frame_location(index: u64) -> Location {
    Location {
        type_tag: 1,
        class_id: MAIN_CLASS,
        method_id: WORK_METHOD,
        index,
    }
}

fn fixture() -> MockVmConfig {
    let mut main_class = MockClass::new(MAIN_CLASS, "Lcom/example/Main;");
    main_class.source_file = Some("Main.java".to_string());
    main_class.fields = vec![MockField {
        id: 101,
        name: "count".to_string(),
        signature: "I".to_string(),
        mod_bits: 0x0002,
    }];
    main_class.methods = vec![MockMethod {
        id: WORK_METHOD,
        name: "work".to_string(),
        signature: "()V".to_string(),
        mod_bits: 0,
        variables: vec![Variable {
            code_index: 0,
            name: "x".to_string(),
            signature: "I".to_string(),
            length: 100,
            slot: 1,
        }],
    }];

    let mut suspended = MockThread::suspended(MAIN_THREAD, "main");
    suspended.frames = vec![
        MockFrame {
            id: TOP_FRAME,
            location: frame_location(5),
            slots: HashMap::from([(1, Value::Int(5))]),
            this_object: None,
        },
        MockFrame {
            id: CALLER_FRAME,
            location: frame_location(20),
            slots: HashMap::new(),
            this_object: None,
        },
    ];
    suspended.owned_monitors = vec![(tags::OBJECT, MONITOR_OBJECT)];

    let mut running = MockThread::suspended(RUNNING_THREAD, "worker");
    running.suspend_count = 0;

    MockVmConfig {
        classes: vec![main_class],
        threads: vec![suspended, running],
        objects: vec![jdwp_mirror::mock::MockObject {
            id: MONITOR_OBJECT,
            tag: tags::OBJECT,
            class: MAIN_CLASS,
            fields: HashMap::new(),
        }],
        ..Default::default()
    }
}

async fn connect(config: MockVmConfig) -> (MockVm, JdwpConnection) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let vm = MockVm::start(config).await.expect("mock VM start");
    let connection = JdwpConnection::connect(&vm.host(), vm.port())
        .await
        .expect("connect");
    (vm, connection)
}

#[tokio::test]
async fn thread_status_and_suspension() {
    let (_vm, connection) = connect(fixture()).await;

    let thread = connection.thread_mirror(MAIN_THREAD);
    assert_eq!(thread.status().await.unwrap(), ThreadStatus::Running);
    assert!(thread.is_suspended().await.unwrap());
    assert_eq!(thread.name().await.unwrap(), "main");

    let worker = connection.thread_mirror(RUNNING_THREAD);
    assert!(!worker.is_suspended().await.unwrap());
}

#[tokio::test]
async fn status_of_unstarted_thread_is_synthesized() {
    let (_vm, connection) = connect(fixture()).await;

    let ghost = connection.thread_mirror(99);
    assert_eq!(ghost.status().await.unwrap(), ThreadStatus::NotStarted);
}

#[tokio::test]
async fn collected_thread_yields_typed_failure_and_fresh_mirror() {
    let (_vm, connection) = connect(fixture()).await;

    let ghost = connection.thread_mirror(99);
    let again = connection.thread_mirror(99);
    assert!(Arc::ptr_eq(&ghost, &again));

    match ghost.is_suspended().await {
        Err(JdwpError::ObjectCollected) => {}
        other => panic!("expected ObjectCollected, got {:?}", other),
    }

    // The collected entity was invalidated; the next lookup builds anew.
    let fresh = connection.thread_mirror(99);
    assert!(!Arc::ptr_eq(&ghost, &fresh));
}

#[tokio::test]
async fn display_name_substitutes_placeholder_for_collected_thread() {
    let (_vm, connection) = connect(fixture()).await;

    let ghost = connection.thread_mirror(99);
    assert_eq!(ghost.display_name().await, "(garbage collected)");

    let live = connection.thread_mirror(MAIN_THREAD);
    assert_eq!(live.display_name().await, "main");
}

#[tokio::test]
async fn mirror_identity_is_shared_per_connection() {
    let (_vm, connection) = connect(fixture()).await;

    let first = connection.thread_mirror(MAIN_THREAD);
    let second = connection.thread_mirror(MAIN_THREAD);
    assert!(Arc::ptr_eq(&first, &second));

    let clone = connection.clone();
    let third = clone.thread_mirror(MAIN_THREAD);
    assert!(Arc::ptr_eq(&first, &third));
}

#[tokio::test]
async fn frames_window_and_bounds() {
    let (_vm, connection) = connect(fixture()).await;
    let thread = connection.thread_mirror(MAIN_THREAD);

    assert_eq!(thread.frame_count().await.unwrap(), 2);

    let frames = thread.all_frames().await.unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].id(), TOP_FRAME);
    assert_eq!(frames[1].id(), CALLER_FRAME);

    let window = thread.frames(1, 1).await.unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].id(), CALLER_FRAME);

    match thread.frames(5, 1).await {
        Err(JdwpError::InvalidFrameIndex) => {}
        other => panic!("expected InvalidFrameIndex, got {:?}", other),
    }
}

#[tokio::test]
async fn obsolete_frame_records_are_skipped() {
    let mut config = fixture();
    config.threads[0].frames.push(MockFrame {
        id: 12,
        location: Location {
            type_tag: 1,
            class_id: MAIN_CLASS,
            method_id: 0,
            index: 0,
        },
        slots: HashMap::new(),
        this_object: None,
    });

    let (_vm, connection) = connect(config).await;
    let thread = connection.thread_mirror(MAIN_THREAD);

    let frames = thread.all_frames().await.unwrap();
    assert_eq!(frames.len(), 2, "record with null method id is omitted");
}

#[tokio::test]
async fn unsuspended_thread_queries_fail_with_incompatible_state() {
    let (_vm, connection) = connect(fixture()).await;
    let worker = connection.thread_mirror(RUNNING_THREAD);

    assert!(matches!(
        worker.all_frames().await,
        Err(JdwpError::ThreadNotSuspended)
    ));
    assert!(matches!(
        worker.frame_count().await,
        Err(JdwpError::ThreadNotSuspended)
    ));
    assert!(matches!(
        worker.owned_monitors().await,
        Err(JdwpError::ThreadNotSuspended)
    ));
    assert!(matches!(
        worker.current_contended_monitor().await,
        Err(JdwpError::ThreadNotSuspended)
    ));
}

#[tokio::test]
async fn monitors_are_mirrored() {
    let (_vm, connection) = connect(fixture()).await;
    let thread = connection.thread_mirror(MAIN_THREAD);

    let monitors = thread.owned_monitors().await.unwrap();
    assert_eq!(monitors.len(), 1);
    assert_eq!(monitors[0].id(), MONITOR_OBJECT);

    assert!(thread.current_contended_monitor().await.unwrap().is_none());
}

#[tokio::test]
async fn frame_locals_read_and_write() {
    let (_vm, connection) = connect(fixture()).await;
    let thread = connection.thread_mirror(MAIN_THREAD);

    let frames = thread.all_frames().await.unwrap();
    let frame = &frames[0];

    let variables = frame.visible_variables().await.unwrap();
    assert_eq!(variables.len(), 1);
    assert_eq!(variables[0].name, "x");

    let value = frame.get_value(&variables[0]).await.unwrap();
    assert_eq!(value, Value::Int(5));

    frame.set_value(&variables[0], &Value::Int(6)).await.unwrap();
    assert_eq!(frame.get_value(&variables[0]).await.unwrap(), Value::Int(6));
}

#[tokio::test]
async fn stale_frame_id_is_a_distinct_failure() {
    let (_vm, connection) = connect(fixture()).await;
    let thread = connection.thread_mirror(MAIN_THREAD);

    let frames = thread.all_frames().await.unwrap();
    let top = frames[0].clone();
    let variables = top.visible_variables().await.unwrap();

    // Pop through the top frame; its id is now stale.
    thread.pop_frames(&top).await.unwrap();
    match top.get_values(&variables).await {
        Err(JdwpError::InvalidFrameId) => {}
        other => panic!("expected InvalidFrameId, got {:?}", other),
    }
}

#[tokio::test]
async fn pop_frames_truncates_the_stack() {
    let (vm, connection) = connect(fixture()).await;
    let thread = connection.thread_mirror(MAIN_THREAD);

    let frames = thread.all_frames().await.unwrap();
    thread.pop_frames(&frames[0]).await.unwrap();

    assert_eq!(vm.frame_count(MAIN_THREAD), Some(1));
    assert_eq!(thread.frame_count().await.unwrap(), 1);
}

#[tokio::test]
async fn pop_frames_requires_suspension_client_side() {
    let (_vm, connection) = connect(fixture()).await;
    let thread = connection.thread_mirror(MAIN_THREAD);
    let frames = thread.all_frames().await.unwrap();

    thread.resume().await.unwrap();
    assert!(matches!(
        thread.pop_frames(&frames[0]).await,
        Err(JdwpError::ThreadNotSuspended)
    ));
}

#[tokio::test]
async fn pop_frames_requires_vm_capability() {
    let mut config = fixture();
    config.capabilities = vec![false; 32];

    let (vm, connection) = connect(config).await;
    let thread = connection.thread_mirror(MAIN_THREAD);
    let frames = thread.all_frames().await.unwrap();

    match thread.pop_frames(&frames[0]).await {
        Err(JdwpError::NotSupported(_)) => {}
        other => panic!("expected NotSupported, got {:?}", other),
    }

    // Rejected before any wire I/O for the pop itself.
    assert!(!vm
        .commands_seen()
        .iter()
        .any(|&(set, command)| set == command_sets::STACK_FRAME && command == 4));
}

#[tokio::test]
async fn suspend_resume_and_count() {
    let (vm, connection) = connect(fixture()).await;
    let thread = connection.thread_mirror(MAIN_THREAD);

    thread.suspend().await.unwrap();
    assert_eq!(thread.suspend_count().await.unwrap(), 2);
    assert_eq!(vm.thread_suspend_count(MAIN_THREAD), Some(2));

    thread.resume().await.unwrap();
    thread.resume().await.unwrap();
    assert!(!thread.is_suspended().await.unwrap());
}

#[tokio::test]
async fn resume_clears_breakpoint_flag() {
    let (_vm, connection) = connect(fixture()).await;
    let thread = connection.thread_mirror(MAIN_THREAD);

    thread.set_at_breakpoint();
    assert!(thread.is_at_breakpoint().await.unwrap());

    thread.resume().await.unwrap();
    thread.suspend().await.unwrap();
    assert!(!thread.is_at_breakpoint().await.unwrap());
}

#[tokio::test]
async fn thread_group_and_strings() {
    let (_vm, connection) = connect(fixture()).await;
    let thread = connection.thread_mirror(MAIN_THREAD);

    let group = thread.thread_group().await.unwrap();
    assert_eq!(group.name().await.unwrap(), "main");

    let remote = connection.create_string("hello").await.unwrap();
    assert_eq!(remote.string_value().await.unwrap(), "hello");
}

#[tokio::test]
async fn reference_type_queries() {
    let (_vm, connection) = connect(fixture()).await;

    let classes = connection.classes_by_name("com.example.Main").await.unwrap();
    assert_eq!(classes.len(), 1);
    let class = &classes[0];
    assert_eq!(class.name().await.unwrap(), "com.example.Main");
    assert_eq!(class.source_file().await.unwrap().as_deref(), Some("Main.java"));

    let fields = class.fields().await.unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].name, "count");

    let method = class.method_named("work", "()V").await.unwrap();
    assert!(method.is_some());
}

#[tokio::test]
async fn vm_level_queries() {
    let (_vm, connection) = connect(fixture()).await;

    let version = connection.version().await.unwrap();
    assert_eq!(version.jdwp_major, 1);
    assert_eq!(version.vm_name, "MockVM");

    let sizes = connection.id_sizes().await.unwrap();
    assert_eq!(sizes.object_id_size, 8);
    assert_eq!(sizes.frame_id_size, 8);

    let threads = connection.all_threads().await.unwrap();
    assert_eq!(threads.len(), 2);
}

#[tokio::test]
async fn capabilities_are_fetched_once() {
    let (vm, connection) = connect(fixture()).await;

    let first = connection.capabilities().await.unwrap();
    let second = connection.capabilities().await.unwrap();
    assert!(first.can_pop_frames && second.can_pop_frames);

    let capability_requests = vm
        .commands_seen()
        .iter()
        .filter(|&&(set, command)| set == command_sets::VIRTUAL_MACHINE && command == 17)
        .count();
    assert_eq!(capability_requests, 1);
}
