// tests/common.rs
#![allow(dead_code)] // Not every test binary uses every helper

use relisten::{OptName, OptValue, OptionSet};
use socket2::SockAddr;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

static UNIX_PATH_COUNTER: AtomicUsize = AtomicUsize::new(0);

static TRACING_INIT: Once = Once::new();

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// Setup function to initialize tracing
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Can be overridden by RUST_LOG env variable
    let default_filter = "relisten=debug,info";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();

    // Another test binary's subscriber may already be installed.
    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

/// A loopback address whose port was free a moment ago.
pub fn free_loopback_addr() -> SocketAddr {
  let probe = TcpListener::bind("127.0.0.1:0").expect("Failed to bind probe listener");
  probe.local_addr().expect("Probe listener has no address")
}

// Helper to generate unique unix socket paths
pub fn unique_unix_path() -> PathBuf {
  let pid = std::process::id();
  let count = UNIX_PATH_COUNTER.fetch_add(1, Ordering::Relaxed);
  std::env::temp_dir().join(format!("relisten_test_{}_{}.sock", pid, count))
}

pub fn template(options: &[(OptName, OptValue)]) -> OptionSet {
  let mut set = OptionSet::new();
  for (name, value) in options {
    set = set.with(*name, value.clone()).expect("Invalid test option");
  }
  set
}

pub fn sock_addr(addr: SocketAddr) -> SockAddr {
  SockAddr::from(addr)
}

/// Connects to `addr`, retrying until the listener is up or `CONNECT_TIMEOUT`
/// passes.
pub fn connect_with_retry(addr: SocketAddr) -> TcpStream {
  let deadline = Instant::now() + CONNECT_TIMEOUT;
  loop {
    match TcpStream::connect(addr) {
      Ok(stream) => return stream,
      Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
      Err(e) => panic!("Could not connect to {} within {:?}: {}", addr, CONNECT_TIMEOUT, e),
    }
  }
}

/// Client thread that connects and writes `payload`.
pub fn spawn_client(addr: SocketAddr, payload: &'static [u8]) -> JoinHandle<()> {
  thread::spawn(move || {
    let mut stream = connect_with_retry(addr);
    stream.write_all(payload).expect("Client write failed");
  })
}

/// Reads exactly `len` bytes from a connected socket.
pub fn read_exact_from(socket: socket2::Socket, len: usize) -> Vec<u8> {
  let mut stream: TcpStream = socket.into();
  stream
    .set_read_timeout(Some(CONNECT_TIMEOUT))
    .expect("Failed to set read timeout");
  let mut buf = vec![0u8; len];
  stream.read_exact(&mut buf).expect("Server read failed");
  buf
}
