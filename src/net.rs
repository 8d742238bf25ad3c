/*!
 * Network Layer and Event Loop
 *
 * One thread, one `mio::Poll`. The listener and every client socket are
 * registered with the poller; a client is watched for readability while
 * it waits for a request and for writability while a reply is pending.
 * Connections live in a table indexed by their file descriptor.
 */

use crate::config::ServerConfig;
use crate::conn::{Conn, ConnState};
use crate::shard::Shard;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// File descriptors are small non-negative integers, so this never
/// collides with a client token.
const LISTENER: Token = Token(usize::MAX);

/// Bind a non-blocking TCP listener with SO_REUSEADDR and the largest
/// backlog the system allows.
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(libc::SOMAXCONN)?;

    Ok(TcpListener::from_std(socket.into()))
}

#[inline]
fn interest_for(state: ConnState) -> Interest {
    match state {
        ConnState::Writing => Interest::WRITABLE,
        ConnState::Reading | ConnState::Closing => Interest::READABLE,
    }
}

pub struct Server {
    poll: Poll,
    listener: TcpListener,
    /// Open connections, indexed by file descriptor
    conns: Vec<Option<Conn<TcpStream>>>,
    live: usize,
    shard: Shard,
    config: ServerConfig,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Bind the listening socket and set up the poller. Nothing is
    /// accepted until `run` is called.
    pub fn bind(config: ServerConfig, shard: Shard) -> Result<Self> {
        config.validate()?;
        let poll = Poll::new()?;
        let mut listener = bind_listener(config.addr).with_context(|| format!("failed to bind {}", config.addr))?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            conns: Vec::new(),
            live: 0,
            shard,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Setting the flag stops `run` within one poll timeout.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Number of open client connections
    pub fn connections(&self) -> usize {
        self.live
    }

    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    /// Run the event loop until the shutdown flag is set.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        info!("shard {} serving on {}", self.shard.id, self.local_addr()?);

        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.config.poll_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e).context("poll failed");
            }

            let mut listener_ready = false;
            for ev in events.iter() {
                match ev.token() {
                    LISTENER => listener_ready = true,
                    Token(fd) => self.drive(fd),
                }
            }

            if listener_ready {
                self.accept_all();
            }
        }

        info!("shard {} stopping with {} open connections", self.shard.id, self.live);
        Ok(())
    }

    /// Let the connection at `fd` make progress, then either tear it down
    /// or point the poller at what it waits for next.
    fn drive(&mut self, fd: usize) {
        let Some(Some(conn)) = self.conns.get_mut(fd) else {
            return;
        };
        let before = conn.state();
        conn.on_ready(&mut self.shard);
        let after = conn.state();

        if after == ConnState::Closing {
            self.close(fd);
        } else if after != before {
            let res = self
                .poll
                .registry()
                .reregister(conn.stream_mut(), Token(fd), interest_for(after));
            if let Err(e) = res {
                warn!("fd {}: reregister failed: {}", fd, e);
                self.close(fd);
            }
        }
    }

    fn close(&mut self, fd: usize) {
        if let Some(mut conn) = self.conns.get_mut(fd).and_then(Option::take) {
            let _ = self.poll.registry().deregister(conn.stream_mut());
            self.live -= 1;
            debug!("fd {}: closed", fd);
        }
    }

    /// Accept until the backlog is empty; the listener is edge-triggered.
    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.live >= self.config.max_connections {
                        warn!("rejecting {}: {} connections open", peer, self.live);
                        continue;
                    }
                    stream.set_nodelay(true).ok();
                    let fd = stream.as_raw_fd() as usize;
                    if let Err(e) = self
                        .poll
                        .registry()
                        .register(&mut stream, Token(fd), Interest::READABLE)
                    {
                        warn!("rejecting {}: register failed: {}", peer, e);
                        continue;
                    }
                    if self.conns.len() <= fd {
                        self.conns.resize_with(fd + 1, || None);
                    }
                    self.conns[fd] = Some(Conn::new(stream));
                    self.live += 1;
                    debug!("fd {}: accepted {}", fd, peer);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("accept failed: {}", e);
                    break;
                }
            }
        }
    }
}
