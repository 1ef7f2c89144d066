use std::{net::SocketAddr, sync::Arc};

use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::watch,
};

use crate::{
    barrier::AgencyBarrier,
    config::ServerConfig,
    pool::{Detach, WorkerPool},
    session::Session,
    store::{BetStore, StoreError},
};

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("the server was already asked to stop")]
    AlreadyStopped,
}

/// Asks a running server to stop accepting agencies
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// the first call starts the shutdown, any later call is reported as an error
    pub fn stop(&self) -> Result<(), ServerError> {
        if self.stop.send_replace(true) {
            return Err(ServerError::AlreadyStopped);
        }

        tracing::info!("stop requested");
        Ok(())
    }
}

/// Accepts agency connections and dispatches them to a pool of workers
pub struct Server {
    listener: TcpListener,
    session: Session,
    barrier: Option<AgencyBarrier>,
    workers: usize,
    stop: Arc<watch::Sender<bool>>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let store = BetStore::open(&config.storage).await?;

        let mut session = Session::new(store, config.max_packet_size);
        let barrier = config
            .expected_agencies
            .map(|expected| AgencyBarrier::new(expected.get()));
        if let Some(barrier) = &barrier {
            session = session.with_barrier(barrier.clone());
        }

        let listener = listen(config.addr, config.listen_backlog).map_err(|source| {
            ServerError::Bind {
                addr: config.addr,
                source,
            }
        })?;

        let (stop, _) = watch::channel(false);

        Ok(Self {
            listener,
            session,
            barrier,
            workers: config.workers,
            stop: Arc::new(stop),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
        }
    }

    /// Runs the accept loop until a stop is requested
    ///
    /// once stopped, no new connection is accepted and every dispatched
    /// session runs to completion before the listening socket is closed.
    /// sessions still waiting on the barrier by then resolve against the
    /// bets stored so far.
    pub async fn run(self) {
        let Server {
            listener,
            session,
            barrier,
            workers,
            stop,
        } = self;

        let pool = WorkerPool::start(workers, move |conn: TcpStream, detach: Detach| {
            let session = session.clone();
            async move {
                let peer = conn.peer_addr().ok();
                match session.handle_in_pool(conn, detach).await {
                    Ok(summary) => {
                        tracing::info!("session with {:?} completed: {:?}", peer, summary)
                    }
                    Err(err) => tracing::warn!("session with {:?} failed: {}", peer, err),
                }
            }
        });
        tracing::info!("dispatching agencies to {} workers", pool.size());

        let mut stopped = stop.subscribe();
        loop {
            tokio::select! {
                biased;

                _ = stop_requested(&mut stopped) => break,
                accepted = listener.accept() => match accepted {
                    Ok((conn, peer)) => {
                        tracing::debug!("accepted a connection from {}", peer);
                        if pool.submit(conn).is_err() {
                            tracing::error!("the worker pool is closed, dropping {}", peer);
                        }
                    }
                    Err(err) => tracing::warn!("failed to accept a connection: {}", err),
                },
            }
        }

        tracing::info!("waiting for in-flight sessions to finish");
        let detached = pool.close().await;

        // every session left is waiting on the barrier, no other agency can finish
        if let Some(barrier) = barrier {
            tracing::info!("{} sessions are waiting on the barrier", detached.len());
            barrier.release();
        }
        detached.join().await;

        drop(listener);
        tracing::info!("server stopped");
    }
}

async fn stop_requested(stopped: &mut watch::Receiver<bool>) {
    // the sender lives as long as the server, this can't fail
    let _ = stopped.wait_for(|stopped| *stopped).await;
}

fn listen(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;

    socket.listen(backlog)
}
