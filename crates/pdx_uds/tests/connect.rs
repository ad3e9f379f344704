use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use pdx_test_utils::{
    FakeClock,
    RecordingRegistry,
    ScriptedSocketOps,
    ScriptedWaiter,
    StubReply,
    temp_fd,
};
use pdx_uds::consts::opcodes;
use pdx_uds::{
    ClientChannelFactory,
    ConnectConfig,
    Error,
    ErrorKind,
    ProtocolViolation,
    WaitError,
};
use tracing_test::traced_test;

const BACKOFF: Duration = Duration::from_millis(100);

struct Harness {
    clock: Arc<FakeClock>,
    waiter: Arc<ScriptedWaiter>,
    sockets: Arc<ScriptedSocketOps>,
    registry: Arc<RecordingRegistry>,
    factory: ClientChannelFactory,
}

impl Harness {
    fn new(
        waiter: impl FnOnce(ScriptedWaiter) -> ScriptedWaiter,
        results: impl IntoIterator<Item = Result<(), Errno>>,
    ) -> Self {
        Self::with_sockets(waiter, ScriptedSocketOps::new(results))
    }

    fn with_sockets(waiter: impl FnOnce(ScriptedWaiter) -> ScriptedWaiter, sockets: ScriptedSocketOps) -> Self {
        let clock = FakeClock::new();
        let waiter = Arc::new(waiter(ScriptedWaiter::new(clock.clone())));
        let sockets = Arc::new(sockets);
        let registry = RecordingRegistry::new();
        let config = ConnectConfig {
            root_path: "/run/pdx".into(),
            ..Default::default()
        };
        let factory = ClientChannelFactory::with_config("system/vsync", registry.clone(), config)
            .unwrap()
            .with_clock(clock.clone())
            .with_waiter(waiter.clone())
            .with_socket_ops(sockets.clone());

        Self {
            clock,
            waiter,
            sockets,
            registry,
            factory,
        }
    }

    /// Asserts that the socket handed out by the factory was closed.
    fn assert_socket_closed(&self) {
        let mut peer = self.sockets.take_peer().expect("no socket was opened");
        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }
}

#[test]
fn test_endpoint_appears_then_accepts() {
    let harness = Harness::new(
        |waiter| waiter.then(Duration::from_millis(50), Ok(())),
        [Err(Errno::ECONNREFUSED)],
    );
    let endpoint = harness.sockets.serve_next(StubReply::single_event());

    let channel = harness.factory.connect(Some(Duration::from_secs(1))).unwrap();

    let request = endpoint.join().unwrap().unwrap();
    assert_eq!(request.opcode, opcodes::CHANNEL_OPEN);
    assert_eq!(request.send_len, 0);
    assert_eq!(request.fd_count, 0);
    assert!(!request.is_impulse);

    assert_eq!(harness.clock.sleeps(), vec![BACKOFF]);
    assert_eq!(harness.registry.len(), 1);
    assert_eq!(harness.registry.created(), 1);

    // Both attempts went through the same socket.
    assert_eq!(harness.sockets.open_count(), 1);
    let fds = harness.sockets.connected_fds();
    assert_eq!(fds.len(), 2);
    assert_eq!(fds[0], fds[1]);

    let handle = channel.handle();
    drop(channel);
    assert_eq!(harness.registry.closed(), vec![handle]);
    assert!(harness.registry.is_empty());
}

#[test]
fn test_sixth_eacces_is_fatal() {
    let harness = Harness::new(|waiter| waiter, vec![Err(Errno::EACCES); 6]);

    let err = harness.factory.connect(None).unwrap_err();
    assert!(matches!(err, Error::Connect(Errno::EACCES)), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::ConnectError);
    assert_eq!(err.errno(), Some(Errno::EACCES));

    assert_eq!(harness.clock.sleeps(), vec![BACKOFF; 5]);
    assert_eq!(harness.sockets.connected_fds().len(), 6);
    assert!(harness.registry.is_empty());
    harness.assert_socket_closed();
}

#[test]
fn test_fifth_eacces_still_retries() {
    let harness = Harness::new(|waiter| waiter, vec![Err(Errno::EACCES); 5]);
    let endpoint = harness.sockets.serve_next(StubReply::single_event());

    harness.factory.connect(None).unwrap().into_handle();
    endpoint.join().unwrap().unwrap();

    assert_eq!(harness.clock.sleeps(), vec![BACKOFF; 5]);
    assert_eq!(harness.registry.len(), 1);
}

#[test]
fn test_missing_node_retries_without_backoff() {
    let mut results = vec![Err(Errno::ENOENT), Err(Errno::ENOTDIR)];
    results.extend(vec![Err(Errno::EACCES); 5]);
    results.push(Err(Errno::ENOENT));
    let harness = Harness::new(|waiter| waiter, results);
    let endpoint = harness.sockets.serve_next(StubReply::single_event());

    harness.factory.connect(Some(Duration::from_secs(1))).unwrap().into_handle();
    endpoint.join().unwrap().unwrap();

    // Only the permission errors slept, and the missing node never used up the EACCES budget.
    assert_eq!(harness.clock.sleeps(), vec![BACKOFF; 5]);
    assert_eq!(harness.waiter.calls().len(), 9);
}

#[test]
fn test_refused_until_deadline() {
    let harness = Harness::new(|waiter| waiter, vec![Err(Errno::ECONNREFUSED); 100]);

    let err = harness.factory.connect(Some(Duration::from_millis(350))).unwrap_err();
    assert!(matches!(err, Error::Timeout), "{err:?}");
    assert_eq!(err.errno(), Some(Errno::ETIMEDOUT));
    assert_eq!(harness.clock.sleeps(), vec![BACKOFF; 4]);
    harness.assert_socket_closed();
}

#[test]
fn test_negative_timeout_never_times_out() {
    let harness = Harness::new(|waiter| waiter, vec![Err(Errno::ECONNREFUSED); 50]);
    let endpoint = harness.sockets.serve_next(StubReply::single_event());

    harness.factory.connect_millis(-1).unwrap().into_handle();
    endpoint.join().unwrap().unwrap();

    assert_eq!(harness.clock.sleeps().len(), 50);
    assert!(harness.waiter.calls().iter().all(Option::is_none));
}

#[test]
fn test_waiter_receives_remaining_budget() {
    let harness = Harness::new(
        |waiter| waiter.then(Duration::from_millis(50), Ok(())),
        [Err(Errno::ECONNREFUSED), Err(Errno::EPERM)],
    );

    let err = harness.factory.connect(Some(Duration::from_secs(1))).unwrap_err();
    assert!(matches!(err, Error::Connect(Errno::EPERM)), "{err:?}");
    assert_eq!(harness.waiter.calls(), vec![
        Some(Duration::from_millis(1000)),
        Some(Duration::from_millis(850)),
    ]);
}

#[test]
fn test_wait_error_is_propagated() {
    let harness = Harness::new(
        |waiter| waiter.then(Duration::ZERO, Err(WaitError::Os(Errno::EACCES))),
        [],
    );

    let err = harness.factory.connect(Some(Duration::from_secs(1))).unwrap_err();
    assert!(matches!(err, Error::Wait(Errno::EACCES)), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::WaitError);
    assert!(harness.sockets.connected_fds().is_empty());
    harness.assert_socket_closed();
}

#[test]
fn test_wait_timeout_is_timeout_when_bounded() {
    let harness = Harness::new(
        |waiter| waiter.then(Duration::from_millis(500), Err(WaitError::TimedOut)),
        [],
    );

    let err = harness.factory.connect(Some(Duration::from_millis(500))).unwrap_err();
    assert!(matches!(err, Error::Timeout), "{err:?}");
}

#[test]
fn test_wait_timeout_is_wait_error_when_unbounded() {
    let harness = Harness::new(|waiter| waiter.then(Duration::ZERO, Err(WaitError::TimedOut)), []);

    let err = harness.factory.connect(None).unwrap_err();
    assert!(matches!(err, Error::Wait(Errno::ETIMEDOUT)), "{err:?}");
}

#[test]
fn test_socket_creation_failure() {
    let harness = Harness::with_sockets(|waiter| waiter, ScriptedSocketOps::failing_open(Errno::EMFILE));

    let err = harness.factory.connect(None).unwrap_err();
    assert!(matches!(err, Error::Resource(Errno::EMFILE)), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::ResourceError);
    assert!(harness.waiter.calls().is_empty());
}

#[test]
fn test_descriptor_index_out_of_range() {
    let harness = Harness::new(|waiter| waiter, []);
    let endpoint = harness.sockets.serve_next(StubReply::new(1, vec![temp_fd()]));

    let err = harness.factory.connect(None).unwrap_err();
    endpoint.join().unwrap().unwrap();

    assert!(
        matches!(
            err,
            Error::Protocol(ProtocolViolation::InvalidDescriptorIndex {
                ret_code: 1,
                descriptors: 1
            })
        ),
        "{err:?}"
    );
    assert_eq!(err.kind(), ErrorKind::ProtocolError);
    assert_eq!(err.errno(), None);
    assert_eq!(harness.registry.created(), 0);
}

#[test]
fn test_negative_return_code_is_rejected() {
    let harness = Harness::new(|waiter| waiter, []);
    let endpoint = harness
        .sockets
        .serve_next(StubReply::new(-(Errno::ENODEV as i32), vec![]));

    let err = harness.factory.connect(None).unwrap_err();
    endpoint.join().unwrap().unwrap();
    assert!(matches!(err, Error::Protocol(_)), "{err:?}");
    assert!(harness.registry.is_empty());
}

#[test]
fn test_peer_hangs_up_before_reply() {
    let harness = Harness::new(|waiter| waiter, []);
    let endpoint = harness.sockets.hang_up_next();

    let err = harness.factory.connect(Some(Duration::from_secs(1))).unwrap_err();
    assert!(matches!(err, Error::Io(Errno::ESHUTDOWN)), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::IOError);
    assert_eq!(err.errno(), Some(Errno::ESHUTDOWN));

    // The endpoint only finishes once the client closed its socket.
    let request = endpoint.join().unwrap().unwrap();
    assert_eq!(request.opcode, opcodes::CHANNEL_OPEN);
    assert_eq!(harness.registry.created(), 0);
}

#[test]
fn test_peer_gone_before_request() {
    let harness = Harness::with_sockets(|waiter| waiter, ScriptedSocketOps::with_closed_peers([]));

    let err = harness.factory.connect(None).unwrap_err();
    assert!(matches!(err, Error::Io(Errno::EPIPE)), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::IOError);
    assert_eq!(harness.sockets.open_count(), 1);
    assert_eq!(harness.registry.created(), 0);
}

#[test]
fn test_event_descriptor_selected_by_index() {
    let harness = Harness::new(|waiter| waiter, []);
    let endpoint = harness
        .sockets
        .serve_next(StubReply::new(2, vec![temp_fd(), temp_fd(), temp_fd()]));

    let handle = harness.factory.connect(None).unwrap().into_handle();
    endpoint.join().unwrap().unwrap();

    let (_, event) = harness.registry.take(handle).unwrap();
    let event = std::fs::File::from(event);
    assert!(event.metadata().unwrap().is_file());
}

#[test]
#[traced_test]
fn test_fatal_error_is_logged() {
    let harness = Harness::new(|waiter| waiter, [Err(Errno::EPERM)]);

    let err = harness.factory.connect(None).unwrap_err();
    assert!(matches!(err, Error::Connect(Errno::EPERM)), "{err:?}");
    assert!(logs_contain("Failed to initialize connection when connecting"));
}
