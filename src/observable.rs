use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::logger::Logger;

type NextFn<T> = Box<dyn Fn(&T) -> Result<()> + Send + Sync>;
type ErrorFn = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;
type CompleteFn = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// A subscriber's callback set. Every field is optional; a subscriber may
/// observe only the channels it cares about.
#[derive(Default)]
pub struct Observer<T> {
    pub next: Option<NextFn<T>>,
    pub error: Option<ErrorFn>,
    pub complete: Option<CompleteFn>,
}

struct Subscription<T> {
    id: u64,
    observer: Observer<T>,
}

struct ObservableState<T> {
    subscribers: RwLock<Vec<Subscription<T>>>,
    next_id: AtomicU64,
}

/// A minimal, synchronous pub/sub primitive: `next`/`error`/`complete` fan
/// out to subscribers in subscription order. A subscriber whose callback
/// returns `Err` is isolated — logged via the owning logger if one has been
/// attached, dropped otherwise — and delivery continues to the rest.
#[derive(Clone)]
pub struct Observable<T> {
    state: Arc<ObservableState<T>>,
    logger: Arc<RwLock<Option<Logger>>>,
}

/// A handle returned by `subscribe` that removes the subscription when
/// disposed.
pub struct Disposer<T> {
    id: u64,
    state: Arc<ObservableState<T>>,
}

impl<T> Disposer<T> {
    pub fn dispose(&self) {
        self.state.subscribers.write().unwrap().retain(|s| s.id != self.id);
    }
}

impl<T> Default for Observable<T> {
    fn default() -> Self {
        Self {
            state: Arc::new(ObservableState {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
            logger: Arc::new(RwLock::new(None)),
        }
    }
}

impl<T> Observable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the logger used to report a throwing subscriber. Without
    /// one, such failures are silently dropped.
    pub fn set_logger(&self, logger: Logger) {
        *self.logger.write().unwrap() = Some(logger);
    }

    pub fn subscribe(&self, observer: Observer<T>) -> Disposer<T> {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.subscribers.write().unwrap().push(Subscription { id, observer });
        Disposer { id, state: self.state.clone() }
    }

    fn report(&self, message: String) {
        if let Some(logger) = self.logger.read().unwrap().as_ref() {
            logger.error(message, None);
        }
    }

    pub fn next(&self, value: &T) {
        let subs = self.state.subscribers.read().unwrap();
        for sub in subs.iter() {
            if let Some(cb) = &sub.observer.next {
                if let Err(e) = cb(value) {
                    self.report(format!("observable subscriber 'next' failed: {e}"));
                }
            }
        }
    }

    pub fn error(&self, message: &str) {
        let subs = self.state.subscribers.read().unwrap();
        for sub in subs.iter() {
            if let Some(cb) = &sub.observer.error {
                if let Err(e) = cb(message) {
                    self.report(format!("observable subscriber 'error' failed: {e}"));
                }
            }
        }
    }

    pub fn complete(&self) {
        let subs = self.state.subscribers.read().unwrap();
        for sub in subs.iter() {
            if let Some(cb) = &sub.observer.complete {
                if let Err(e) = cb() {
                    self.report(format!("observable subscriber 'complete' failed: {e}"));
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.subscribers.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn delivers_in_subscription_order() {
        let obs: Observable<i32> = Observable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            let tag = tag.to_string();
            obs.subscribe(Observer {
                next: Some(Box::new(move |v| {
                    seen.lock().unwrap().push(format!("{tag}:{v}"));
                    Ok(())
                })),
                error: None,
                complete: None,
            });
        }

        obs.next(&42);
        assert_eq!(*seen.lock().unwrap(), vec!["a:42", "b:42", "c:42"]);
    }

    #[test]
    fn a_throwing_subscriber_does_not_block_the_rest() {
        let obs: Observable<i32> = Observable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        obs.subscribe(Observer {
            next: Some(Box::new(|_| Err(crate::error::Error::Other("boom".into())))),
            error: None,
            complete: None,
        });
        {
            let seen = seen.clone();
            obs.subscribe(Observer {
                next: Some(Box::new(move |v| {
                    seen.lock().unwrap().push(*v);
                    Ok(())
                })),
                error: None,
                complete: None,
            });
        }

        obs.next(&7);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn dispose_removes_the_subscription() {
        let obs: Observable<i32> = Observable::new();
        let seen = Arc::new(Mutex::new(0));
        let seen2 = seen.clone();
        let disposer = obs.subscribe(Observer {
            next: Some(Box::new(move |v| {
                *seen2.lock().unwrap() += v;
                Ok(())
            })),
            error: None,
            complete: None,
        });
        disposer.dispose();
        obs.next(&5);
        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(obs.subscriber_count(), 0);
    }
}
