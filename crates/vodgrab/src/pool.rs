// Bounded HTTP client pool.
//
// Handles are handed out LIFO so the most recently used client (with the
// warmest keep-alive connections) goes back out first. Acquire waits
// cooperatively when all handles are out.

use crate::config::HttpConfig;
use crate::error::DownloadError;
use reqwest::Client;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct ClientPool {
    idle: Mutex<Vec<Client>>,
    semaphore: Arc<Semaphore>,
    max_size: usize,
}

impl ClientPool {
    pub fn new(config: &HttpConfig) -> Result<Arc<Self>, DownloadError> {
        let mut idle = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            idle.push(build_client(config)?);
        }
        Ok(Arc::new(Self {
            idle: Mutex::new(idle),
            semaphore: Arc::new(Semaphore::new(config.pool_size)),
            max_size: config.pool_size,
        }))
    }

    /// Take a client handle, waiting until one is free.
    ///
    /// Fails with `Cancelled` after `close_all`.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledClient, DownloadError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DownloadError::Cancelled)?;
        let client = self
            .idle
            .lock()
            .unwrap()
            .pop()
            .expect("pool invariant violated: permit issued with no idle client");
        Ok(PooledClient {
            client: Some(client),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Drain idle handles and fail all pending and future acquires.
    pub fn close_all(&self) {
        self.semaphore.close();
        self.idle.lock().unwrap().clear();
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

/// RAII handle: the client returns to the pool on drop.
pub struct PooledClient {
    client: Option<Client>,
    pool: Arc<ClientPool>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().expect("client taken")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if !self.pool.semaphore.is_closed() {
                self.pool.idle.lock().unwrap().push(client);
            }
        }
    }
}

fn build_client(config: &HttpConfig) -> Result<Client, DownloadError> {
    let client = Client::builder()
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(config.pool_idle_timeout)
        .build()?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool_of(size: usize) -> Arc<ClientPool> {
        ClientPool::new(&HttpConfig {
            pool_size: size,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn acquire_release_cycle() {
        let pool = pool_of(2);
        assert_eq!(pool.idle_count(), 2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.idle_count(), 0);
        drop(a);
        assert_eq!(pool.idle_count(), 1);
        drop(b);
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let pool = pool_of(1);
        let held = pool.acquire().await.unwrap();

        let pool2 = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { pool2.acquire().await.map(|_| ()) });

        // The waiter cannot finish while the handle is out.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn capacity_invariant_holds() {
        let pool = pool_of(3);
        let guards: Vec<_> = vec![
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ];
        assert!(guards.len() + pool.idle_count() <= pool.max_size());
        drop(guards);
        assert_eq!(pool.idle_count(), pool.max_size());
    }

    #[tokio::test]
    async fn close_all_fails_pending_acquires() {
        let pool = pool_of(1);
        let _held = pool.acquire().await.unwrap();

        let pool2 = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { pool2.acquire().await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.close_all();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }

    #[tokio::test]
    async fn acquire_after_close_fails() {
        let pool = pool_of(2);
        pool.close_all();
        assert!(pool.acquire().await.is_err());
    }
}
