//! Capture session threads shared by every frame source
//!
//! A session runs two threads: a capture thread that produces frames and a
//! delivery thread that hands the latest frame to the registered callback.
//! They are joined by a single-slot mailbox so late frames are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use tracing::{debug, info, instrument, warn};

use crate::capture::frame::{CapturedFrame, FrameClock, FrameMetadata, PixelFormat};
use crate::capture::source::OnFrame;
use crate::error::StartError;
use crate::pipeline::mailbox::{mailbox, MailboxSender, MailboxStats, Take};

const DELIVERY_POLL: Duration = Duration::from_millis(50);
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Produces frames on the capture thread.
pub trait FrameProducer {
    /// Block until the next frame is available and publish it.
    fn produce(&mut self, out: &mut FramePublisher) -> std::io::Result<()>;
}

/// Publishes frames from the capture thread into the mailbox.
pub struct FramePublisher {
    mailbox: MailboxSender<CapturedFrame>,
    clock: FrameClock,
    format: PixelFormat,
}

impl FramePublisher {
    /// Publish a tightly packed frame. Returns true if a late frame was dropped.
    pub fn publish(&mut self, data: Bytes, width: u32, height: u32) -> bool {
        let (sequence, timestamp) = self.clock.tick();
        let meta = FrameMetadata {
            sequence,
            width,
            height,
            stride: width * self.format.bytes_per_pixel(),
            format: self.format,
            timestamp,
        };
        let dropped = self.mailbox.post(CapturedFrame { data, meta });
        if dropped {
            debug!(sequence, "late frame discarded");
        }
        dropped
    }
}

/// Handle to a running capture session
pub struct CaptureHandle {
    label: String,
    running: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
    delivery: Option<JoinHandle<()>>,
    stats: Arc<CachePadded<MailboxStats>>,
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("label", &self.label)
            .field("running", &self.is_running())
            .finish()
    }
}

impl CaptureHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Frames (posted, delivered, discarded) so far.
    pub fn stats(&self) -> (u64, u64, u64) {
        self.stats.snapshot()
    }

    /// Stop both threads and wait for them. After this returns the frame
    /// callback has finished its last invocation.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        for handle in [self.capture.take(), self.delivery.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!(label = %self.label, "capture session thread panicked");
            }
        }
        let (posted, delivered, discarded) = self.stats.snapshot();
        info!(
            label = %self.label,
            posted, delivered, discarded,
            "capture session stopped"
        );
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if self.capture.is_some() || self.delivery.is_some() {
            self.shutdown();
        }
    }
}

/// Spawn a capture session.
///
/// `setup` runs on the capture thread and must return the producer or the
/// reason the session could not be configured; this call blocks until it has
/// done either.
#[instrument(skip(setup, on_frame))]
pub fn spawn_session<S, P>(
    label: &str,
    format: PixelFormat,
    setup: S,
    mut on_frame: OnFrame,
) -> Result<CaptureHandle, StartError>
where
    S: FnOnce() -> Result<P, StartError> + Send + 'static,
    P: FrameProducer,
{
    let running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mailbox::<CapturedFrame>();
    let stats = rx.stats();
    let (ready_tx, ready_rx) = flume::bounded::<Result<(), StartError>>(1);

    let capture_running = running.clone();
    let capture = std::thread::Builder::new()
        .name(format!("{label}-capture"))
        .spawn(move || {
            let mut producer = match setup() {
                Ok(p) => {
                    let _ = ready_tx.send(Ok(()));
                    p
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let mut publisher = FramePublisher {
                mailbox: tx,
                clock: FrameClock::new(),
                format,
            };

            while capture_running.load(Ordering::Acquire) {
                if let Err(e) = producer.produce(&mut publisher) {
                    warn!("Capture error: {}", e);
                    std::thread::sleep(RETRY_BACKOFF);
                }
            }
        })
        .map_err(|e| StartError::SessionConfigError(format!("capture thread: {e}")))?;

    let ready = ready_rx.recv().unwrap_or_else(|_| {
        Err(StartError::SessionConfigError(
            "capture thread exited during setup".into(),
        ))
    });
    if let Err(e) = ready {
        running.store(false, Ordering::Release);
        let _ = capture.join();
        return Err(e);
    }

    let delivery_running = running.clone();
    let delivery = std::thread::Builder::new()
        .name(format!("{label}-delivery"))
        .spawn(move || loop {
            match rx.take(DELIVERY_POLL) {
                Take::Item(frame) => {
                    if !delivery_running.load(Ordering::Acquire) {
                        break;
                    }
                    on_frame(frame.as_frame());
                }
                Take::Empty => {
                    if !delivery_running.load(Ordering::Acquire) {
                        break;
                    }
                }
                Take::Closed => break,
            }
        });

    let delivery = match delivery {
        Ok(handle) => handle,
        Err(e) => {
            running.store(false, Ordering::Release);
            let _ = capture.join();
            return Err(StartError::SessionConfigError(format!(
                "delivery thread: {e}"
            )));
        }
    };

    info!(label, "capture session started");

    Ok(CaptureHandle {
        label: label.to_string(),
        running,
        capture: Some(capture),
        delivery: Some(delivery),
        stats,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;

    struct Counter {
        width: u32,
        height: u32,
    }

    impl FrameProducer for Counter {
        fn produce(&mut self, out: &mut FramePublisher) -> std::io::Result<()> {
            std::thread::sleep(Duration::from_millis(1));
            let len = (self.width * self.height * 4) as usize;
            out.publish(Bytes::from(vec![0u8; len]), self.width, self.height);
            Ok(())
        }
    }

    #[test]
    fn failed_setup_is_reported_synchronously() {
        let result = spawn_session::<_, Counter>(
            "test",
            PixelFormat::Bgra8,
            || Err(StartError::DeviceUnavailable("nope".into())),
            Box::new(|_| panic!("no frames expected")),
        );
        assert!(matches!(result, Err(StartError::DeviceUnavailable(_))));
    }

    #[test]
    fn no_callback_after_stop() {
        let calls = Arc::new(AtomicU64::new(0));
        let in_callback = Arc::new(AtomicBool::new(false));

        let handle = {
            let calls = calls.clone();
            let in_callback = in_callback.clone();
            spawn_session(
                "test",
                PixelFormat::Bgra8,
                || {
                    Ok(Counter {
                        width: 4,
                        height: 2,
                    })
                },
                Box::new(move |frame| {
                    in_callback.store(true, Ordering::SeqCst);
                    assert_eq!(frame.data.len(), 32);
                    assert_eq!(frame.meta.stride, 16);
                    std::thread::sleep(Duration::from_millis(2));
                    calls.fetch_add(1, Ordering::SeqCst);
                    in_callback.store(false, Ordering::SeqCst);
                }),
            )
            .unwrap()
        };

        std::thread::sleep(Duration::from_millis(50));
        handle.stop();

        assert!(!in_callback.load(Ordering::SeqCst));
        let after_stop = calls.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn slow_consumer_drops_frames_instead_of_queueing() {
        let handle = spawn_session(
            "test",
            PixelFormat::Bgra8,
            || {
                Ok(Counter {
                    width: 2,
                    height: 2,
                })
            },
            Box::new(|_| std::thread::sleep(Duration::from_millis(20))),
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(150));
        let stats = handle.stats.clone();
        handle.stop();
        let (posted, delivered, discarded) = stats.snapshot();

        assert!(discarded > 0, "expected late frames to be discarded");
        // At most one frame was left waiting in the mailbox
        assert!(posted - delivered - discarded <= 1);
    }
}
