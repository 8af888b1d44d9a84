//! Bounded pool of reusable UDP sockets for STUN exchanges.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{RtcError, RtcResult};

pub struct SocketPool {
    idle: Mutex<Vec<Arc<UdpSocket>>>,
    slots: Arc<Semaphore>,
    max_size: usize,
}

impl SocketPool {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            idle: Mutex::new(Vec::new()),
            slots: Arc::new(Semaphore::new(max_size)),
            max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Sockets currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Borrow a socket, waiting for a free slot when the pool is exhausted.
    ///
    /// The slot is freed when the guard drops, including when the owning
    /// future is cancelled. The socket itself goes back to the pool only if
    /// the borrower called [`PooledSocket::recycle`].
    pub async fn acquire(&self) -> RtcResult<PooledSocket<'_>> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| RtcError::ConnectionFailure("socket pool closed".to_string()))?;

        let reused = self.idle.lock().pop();
        let socket = match reused {
            Some(socket) => {
                drain(&socket);
                socket
            }
            None => Arc::new(UdpSocket::bind("0.0.0.0:0").await?),
        };

        Ok(PooledSocket {
            pool: self,
            socket,
            reusable: false,
            _permit: permit,
        })
    }

    fn release(&self, socket: Arc<UdpSocket>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_size {
            idle.push(socket);
        }
    }
}

/// Drop datagrams left over from an earlier exchange.
fn drain(socket: &UdpSocket) {
    let mut buf = [0u8; 64];
    while socket.try_recv_from(&mut buf).is_ok() {}
}

/// Scoped socket borrow.
pub struct PooledSocket<'a> {
    pool: &'a SocketPool,
    socket: Arc<UdpSocket>,
    reusable: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledSocket<'_> {
    /// Return the socket to the pool on release. Call only once no reply can
    /// still be in flight.
    pub fn recycle(&mut self) {
        self.reusable = true;
    }
}

impl Deref for PooledSocket<'_> {
    type Target = UdpSocket;

    fn deref(&self) -> &UdpSocket {
        &self.socket
    }
}

impl Drop for PooledSocket<'_> {
    fn drop(&mut self) {
        if self.reusable {
            self.pool.release(Arc::clone(&self.socket));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_socket_returned_after_use() {
        let pool = SocketPool::new(2);
        let port = {
            let mut socket = pool.acquire().await.unwrap();
            socket.recycle();
            socket.local_addr().unwrap().port()
        };
        assert_eq!(pool.idle_count(), 1);

        let socket = pool.acquire().await.unwrap();
        assert_eq!(socket.local_addr().unwrap().port(), port);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_unrecycled_socket_not_reused() {
        let pool = SocketPool::new(2);
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_waits_when_exhausted() {
        let pool = SocketPool::new(1);
        let held = pool.acquire().await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err());

        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(500), pool.acquire()).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_borrow_releases_slot_but_not_socket() {
        let pool = SocketPool::new(1);
        let borrow = async {
            let socket = pool.acquire().await.unwrap();
            let mut buf = [0u8; 16];
            // A reply could still land on this socket after cancellation.
            let _ = socket.recv_from(&mut buf).await;
        };
        // Cancel mid-exchange by timing out the whole future.
        let _ = tokio::time::timeout(Duration::from_millis(20), borrow).await;

        let again = tokio::time::timeout(Duration::from_millis(500), pool.acquire()).await;
        assert!(again.is_ok());
        assert_eq!(pool.idle_count(), 0);
    }
}
