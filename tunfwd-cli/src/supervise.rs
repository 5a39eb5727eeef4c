//! The daemon's main thread waiting on the engine thread.

use std::fmt;
use std::io;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How often a pending stop request is checked for.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Wait for the engine thread's report, delivering a stop once
/// `stop_requested` turns true.
///
/// The thread is joined whenever it has finished, whatever it reported.
/// When the stop cannot be delivered the thread may still be running, so it
/// is left detached instead of blocking shutdown.
pub fn supervise<T, E: fmt::Display>(
    done: &mpsc::Receiver<Result<T, E>>,
    engine: JoinHandle<()>,
    interval: Duration,
    mut stop_requested: impl FnMut() -> bool,
    mut send_stop: impl FnMut() -> io::Result<()>,
) -> Result<T, String> {
    let mut stop_sent = false;
    let mut finished = true;
    let result = loop {
        match done.recv_timeout(interval) {
            Ok(result) => break result.map_err(|e| format!("Forwarding engine failed: {}", e)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !stop_sent && stop_requested() {
                    log::info!("Shutting down...");
                    if let Err(e) = send_stop() {
                        log::error!("Failed to send STOP to engine: {}", e);
                        finished = false;
                        break Err("engine could not be stopped".into());
                    }
                    stop_sent = true;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                break Err("Forwarding engine thread exited unexpectedly".into());
            }
        }
    };

    if finished && engine.join().is_err() {
        log::warn!("Engine thread panicked");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    const TICK: Duration = Duration::from_millis(10);

    /// An engine stand-in that reports `outcome`, then lingers before
    /// setting `exited`. Seeing `exited` after `supervise` returns means
    /// the thread was joined.
    fn reporting_engine(
        outcome: Result<u32, String>,
    ) -> (mpsc::Receiver<Result<u32, String>>, JoinHandle<()>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel();
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();
        let handle = thread::spawn(move || {
            tx.send(outcome).unwrap();
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
        });
        (rx, handle, exited)
    }

    #[test]
    fn joins_after_success() {
        let (rx, handle, exited) = reporting_engine(Ok(7));
        let result = supervise(&rx, handle, TICK, || false, || Ok(()));
        assert_eq!(result, Ok(7));
        assert!(exited.load(Ordering::SeqCst));
    }

    #[test]
    fn joins_after_engine_error() {
        let (rx, handle, exited) = reporting_engine(Err("tun descriptor hung up".into()));
        let result = supervise(&rx, handle, TICK, || false, || Ok(()));
        assert_eq!(
            result,
            Err("Forwarding engine failed: tun descriptor hung up".to_string())
        );
        assert!(exited.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_request_is_delivered_once() {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel::<Result<u32, String>>();
        let handle = thread::spawn(move || {
            stop_rx.recv().unwrap();
            tx.send(Ok(1)).unwrap();
        });

        let mut sent = 0;
        let result = supervise(
            &rx,
            handle,
            TICK,
            || true,
            || {
                sent += 1;
                stop_tx.send(()).map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
            },
        );
        assert_eq!(result, Ok(1));
        assert_eq!(sent, 1);
    }

    #[test]
    fn undeliverable_stop_does_not_wait_for_engine() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel::<Result<u32, String>>();
        let handle = thread::spawn(move || {
            let _ = release_rx.recv();
            let _ = tx.send(Ok(0));
        });

        let result = supervise(&rx, handle, TICK, || true, || {
            Err(io::Error::new(io::ErrorKind::NotFound, "no control socket"))
        });
        assert_eq!(result, Err("engine could not be stopped".to_string()));
        drop(release_tx);
    }

    #[test]
    fn engine_panic_is_reported() {
        let (tx, rx) = mpsc::channel::<Result<u32, String>>();
        let handle = thread::spawn(move || {
            let _tx = tx;
            panic!("engine blew up");
        });
        let result = supervise(&rx, handle, TICK, || false, || Ok(()));
        assert_eq!(
            result,
            Err("Forwarding engine thread exited unexpectedly".to_string())
        );
    }
}
