use std::{
  sync::atomic::{AtomicU64, Ordering},
  time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle};

pub type TimerId = u64;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Posted into the controller queue when a boost timer runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
  ValveBoost { room: String, timer: TimerId },
  RoomBoost { room: String, timer: TimerId },
  BoostAll { timer: TimerId },
}

pub type ExpirySender = mpsc::UnboundedSender<Expiry>;
pub type ExpiryReceiver = mpsc::UnboundedReceiver<Expiry>;

/// Single shot timer. Dropping or cancelling it aborts the pending task, so
/// a released handle never fires.
#[derive(Debug)]
pub struct Timer {
  id: TimerId,
  handle: JoinHandle<()>,
}

impl Timer {
  pub fn arm<F>(after: Duration, expiries: &ExpirySender, expiry: F) -> Timer
  where
    F: FnOnce(TimerId) -> Expiry,
  {
    let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
    let expiry = expiry(id);
    let expiries = expiries.clone();
    log::debug!("arming timer {} for {:?}: {:?}", id, after, expiry);
    let handle = tokio::spawn(async move {
      tokio::time::sleep(after).await;
      if expiries.send(expiry).is_err() {
        log::warn!("timer {} fired after the controller stopped", id);
      }
    });
    Timer { id, handle }
  }

  pub fn id(&self) -> TimerId {
    self.id
  }

  pub fn cancel(self) {
    log::debug!("cancelling timer {}", self.id);
    self.handle.abort();
  }
}

impl Drop for Timer {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn fires_once_after_delay() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let timer = Timer::arm(Duration::from_secs(60), &tx, |timer| Expiry::BoostAll { timer });
    let id = timer.id();
    assert_eq!(rx.recv().await, Some(Expiry::BoostAll { timer: id }));
    drop(tx);
    drop(timer);
    assert_eq!(rx.recv().await, None);
  }

  #[tokio::test(start_paused = true)]
  async fn cancelled_timer_never_fires() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let timer = Timer::arm(Duration::from_secs(60), &tx, |timer| Expiry::BoostAll { timer });
    timer.cancel();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn ids_are_unique() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let a = Timer::arm(Duration::from_secs(1), &tx, |timer| Expiry::BoostAll { timer });
    let b = Timer::arm(Duration::from_secs(1), &tx, |timer| Expiry::BoostAll { timer });
    assert_ne!(a.id(), b.id());
  }
}
