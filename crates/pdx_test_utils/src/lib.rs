//! Shared fakes for exercising the PDX connect path without real delays or a real service.

use std::collections::VecDeque;
use std::io::{
    IoSlice,
    Read,
};
use std::net::Shutdown;
use std::os::fd::{
    AsFd,
    AsRawFd,
    BorrowedFd,
    OwnedFd,
    RawFd,
};
use std::os::unix::net::{
    UnixListener,
    UnixStream,
};
use std::path::{
    Path,
    PathBuf,
};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{
    Duration,
    Instant,
};

use nix::errno::Errno;
use nix::sys::socket::{
    self,
    ControlMessage,
    MsgFlags,
    UnixAddr,
};
use parking_lot::Mutex;
use pdx_uds::protocol::{
    REQUEST_HEADER_LEN,
    RequestHeader,
    ResponseHeader,
};
use pdx_uds::{
    ChannelHandle,
    ChannelRegistry,
    Clock,
    EndpointWaiter,
    SocketOps,
    WaitError,
};

/// Enables tracing to stderr. Useful when debugging a particular test.
pub fn enable_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_test_writer()
        .try_init()
        .ok();
}

/// [Clock] whose time only moves when slept on or advanced explicitly.
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<Instant>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Instant::now()),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock() += duration;
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}

/// [EndpointWaiter] that replays scripted steps, then reports the endpoint as present.
///
/// Each step advances the shared [FakeClock] before returning its result, which models the time
/// spent blocked waiting.
#[derive(Debug)]
pub struct ScriptedWaiter {
    clock: Arc<FakeClock>,
    steps: Mutex<VecDeque<(Duration, Result<(), WaitError>)>>,
    calls: Mutex<Vec<Option<Duration>>>,
}

impl ScriptedWaiter {
    pub fn new(clock: Arc<FakeClock>) -> Self {
        Self {
            clock,
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, elapsed: Duration, result: Result<(), WaitError>) -> Self {
        self.steps.lock().push_back((elapsed, result));
        self
    }

    /// Timeouts passed to each wait, in order.
    pub fn calls(&self) -> Vec<Option<Duration>> {
        self.calls.lock().clone()
    }
}

impl EndpointWaiter for ScriptedWaiter {
    fn wait_for_endpoint(&self, _path: &Path, timeout: Option<Duration>) -> Result<(), WaitError> {
        self.calls.lock().push(timeout);
        match self.steps.lock().pop_front() {
            Some((elapsed, result)) => {
                self.clock.advance(elapsed);
                result
            },
            None => Ok(()),
        }
    }
}

/// [SocketOps] whose connect results are scripted.
///
/// `open` hands out one end of a socket pair, and the other end is kept for the test to play the
/// endpoint. Once the script runs out every connect succeeds.
#[derive(Debug, Default)]
pub struct ScriptedSocketOps {
    results: Mutex<VecDeque<Result<(), Errno>>>,
    peers: Mutex<Vec<UnixStream>>,
    opens: Mutex<usize>,
    connected_fds: Mutex<Vec<RawFd>>,
    open_error: Option<Errno>,
    close_peers: bool,
}

impl ScriptedSocketOps {
    pub fn new(results: impl IntoIterator<Item = Result<(), Errno>>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn failing_open(errno: Errno) -> Self {
        Self {
            open_error: Some(errno),
            ..Default::default()
        }
    }

    /// Like [Self::new], but the endpoint end of every socket is closed as soon as it is opened.
    pub fn with_closed_peers(results: impl IntoIterator<Item = Result<(), Errno>>) -> Self {
        Self {
            close_peers: true,
            ..Self::new(results)
        }
    }

    pub fn open_count(&self) -> usize {
        *self.opens.lock()
    }

    /// Descriptor used by each connect attempt, in order.
    pub fn connected_fds(&self) -> Vec<RawFd> {
        self.connected_fds.lock().clone()
    }

    pub fn take_peer(&self) -> Option<UnixStream> {
        self.peers.lock().pop()
    }

    /// Plays the endpoint for the next socket handed out by `open`, on a background thread.
    pub fn serve_next(self: &Arc<Self>, reply: StubReply) -> JoinHandle<std::io::Result<RequestHeader>> {
        let sockets = Arc::clone(self);
        std::thread::spawn(move || serve_channel_open(sockets.wait_for_peer()?, reply))
    }

    /// Reads the request on the next socket handed out by `open`, then hangs up without replying.
    ///
    /// The thread finishes once the client side of the socket has been closed too.
    pub fn hang_up_next(self: &Arc<Self>) -> JoinHandle<std::io::Result<RequestHeader>> {
        let sockets = Arc::clone(self);
        std::thread::spawn(move || {
            let mut stream = sockets.wait_for_peer()?;
            let request = read_request(&mut stream)?;
            stream.shutdown(Shutdown::Write)?;
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest)?;
            Ok(request)
        })
    }

    fn wait_for_peer(&self) -> std::io::Result<UnixStream> {
        let give_up = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(peer) = self.take_peer() {
                return Ok(peer);
            }
            if Instant::now() > give_up {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no socket was opened"));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl SocketOps for ScriptedSocketOps {
    fn open(&self) -> Result<OwnedFd, Errno> {
        *self.opens.lock() += 1;
        if let Some(errno) = self.open_error {
            return Err(errno);
        }
        let (client, peer) = UnixStream::pair().map_err(|err| Errno::from_raw(err.raw_os_error().unwrap_or(0)))?;
        if !self.close_peers {
            self.peers.lock().push(peer);
        }
        Ok(client.into())
    }

    fn connect(&self, socket: BorrowedFd<'_>, _addr: &UnixAddr) -> Result<(), Errno> {
        self.connected_fds.lock().push(socket.as_raw_fd());
        self.results.lock().pop_front().unwrap_or(Ok(()))
    }
}

/// [ChannelRegistry] that keeps every registered pair for inspection.
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    channels: Mutex<Vec<(ChannelHandle, OwnedFd, OwnedFd)>>,
    closed: Mutex<Vec<ChannelHandle>>,
    created: Mutex<i32>,
}

impl RecordingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    /// Number of handles ever created, including closed ones.
    pub fn created(&self) -> usize {
        *self.created.lock() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    pub fn closed(&self) -> Vec<ChannelHandle> {
        self.closed.lock().clone()
    }

    /// Removes the pair registered under `handle`.
    pub fn take(&self, handle: ChannelHandle) -> Option<(OwnedFd, OwnedFd)> {
        let mut channels = self.channels.lock();
        let index = channels.iter().position(|(h, ..)| *h == handle)?;
        let (_, socket, event) = channels.remove(index);
        Some((socket, event))
    }
}

impl ChannelRegistry for RecordingRegistry {
    fn create_handle(&self, socket: OwnedFd, event: OwnedFd) -> ChannelHandle {
        let mut created = self.created.lock();
        *created += 1;
        let handle = ChannelHandle::new(1000 + *created);
        self.channels.lock().push((handle, socket, event));
        handle
    }

    fn close_handle(&self, handle: ChannelHandle) -> bool {
        self.closed.lock().push(handle);
        self.take(handle).is_some()
    }
}

/// How the stub endpoint answers a `CHANNEL_OPEN` request.
#[derive(Debug)]
pub struct StubReply {
    pub ret_code: i32,
    pub descriptors: Vec<OwnedFd>,
}

impl StubReply {
    pub fn new(ret_code: i32, descriptors: Vec<OwnedFd>) -> Self {
        Self { ret_code, descriptors }
    }

    /// Replies with index 0 and a single descriptor to an anonymous temporary file.
    pub fn single_event() -> Self {
        Self::new(0, vec![temp_fd()])
    }
}

/// Returns a descriptor to an anonymous temporary file.
pub fn temp_fd() -> OwnedFd {
    tempfile::tempfile().expect("failed to create temporary file").into()
}

fn read_request(stream: &mut UnixStream) -> std::io::Result<RequestHeader> {
    let mut frame = [0u8; REQUEST_HEADER_LEN];
    stream.read_exact(&mut frame)?;
    RequestHeader::decode(&frame).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

/// Reads one request from `stream` and answers it with `reply`.
pub fn serve_channel_open(mut stream: UnixStream, reply: StubReply) -> std::io::Result<RequestHeader> {
    let request = read_request(&mut stream)?;

    let header = ResponseHeader::new(reply.ret_code).encode();
    let raw_fds: Vec<RawFd> = reply.descriptors.iter().map(|fd| fd.as_raw_fd()).collect();
    let cmsgs = if raw_fds.is_empty() {
        vec![]
    } else {
        vec![ControlMessage::ScmRights(&raw_fds)]
    };
    socket::sendmsg::<()>(
        stream.as_fd().as_raw_fd(),
        &[IoSlice::new(&header)],
        &cmsgs,
        MsgFlags::empty(),
        None,
    )?;
    Ok(request)
}

/// A listening socket that answers exactly one connection on a background thread.
pub struct StubEndpoint {
    path: PathBuf,
    thread: Option<JoinHandle<std::io::Result<RequestHeader>>>,
}

impl StubEndpoint {
    pub fn bind(path: impl Into<PathBuf>, reply: StubReply) -> std::io::Result<Self> {
        let path = path.into();
        let listener = UnixListener::bind(&path)?;
        let thread = std::thread::spawn(move || {
            let (stream, _) = listener.accept()?;
            serve_channel_open(stream, reply)
        });
        Ok(Self {
            path,
            thread: Some(thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the endpoint to finish and returns the request it received.
    pub fn join(mut self) -> std::io::Result<RequestHeader> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stub endpoint panicked"))),
            None => Err(std::io::Error::other("stub endpoint already joined")),
        }
    }
}
