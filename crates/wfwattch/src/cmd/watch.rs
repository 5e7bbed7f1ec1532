use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use wfwattch_frame::Reading;
use wfwattch_session::{DeviceSession, SessionError};

use crate::cmd::{parse_duration, WatchArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_watch_reading, OutputFormat};

/// Longest single sleep between stop-flag checks.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let mut session = args.device.session()?;
    let timeout = session.config().timeout;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    info!(endpoint = %session.endpoint(), ?interval, "watching meter");

    let mut printed = 0usize;
    let mut next_tick = Instant::now();
    while running.load(Ordering::SeqCst) {
        match poll_once(&mut session, timeout) {
            Ok(reading) => {
                print_watch_reading(&reading, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Err(err) => warn!(error = %err, "poll failed, reconnecting on next tick"),
        }

        let next = next_deadline(next_tick, interval, Instant::now());
        if let Some(tick) = next {
            next_tick = tick;
        }
        sleep_until(next, &running);
    }

    session.close();
    Ok(SUCCESS)
}

/// The session operations the polling loop drives.
trait Meter {
    fn is_connected(&self) -> bool;
    fn connect(&mut self, timeout: Duration) -> Result<(), SessionError>;
    fn update(&mut self, timeout: Duration) -> Result<Reading, SessionError>;
    fn close(&mut self);
}

impl Meter for DeviceSession {
    fn is_connected(&self) -> bool {
        DeviceSession::is_connected(self)
    }

    fn connect(&mut self, timeout: Duration) -> Result<(), SessionError> {
        DeviceSession::connect(self, timeout)
    }

    fn update(&mut self, timeout: Duration) -> Result<Reading, SessionError> {
        DeviceSession::update(self, timeout)
    }

    fn close(&mut self) {
        DeviceSession::close(self)
    }
}

/// One tick: connect if needed, measure, and close after any failure.
fn poll_once<M: Meter>(meter: &mut M, timeout: Duration) -> Result<Reading, SessionError> {
    let result = if meter.is_connected() {
        meter.update(timeout)
    } else {
        meter.connect(timeout).and_then(|()| meter.update(timeout))
    };

    if result.is_err() {
        meter.close();
    }
    result
}

/// The tick after `tick`, never earlier than `now`. `None` when the interval
/// runs past the representable range, which leaves the loop waiting for Ctrl-C.
fn next_deadline(tick: Instant, interval: Duration, now: Instant) -> Option<Instant> {
    tick.checked_add(interval).map(|next| next.max(now))
}

/// Sleep until `deadline`, or until stopped when there is none.
fn sleep_until(deadline: Option<Instant>, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        let slice = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return;
                }
                left.min(SLEEP_SLICE)
            }
            None => SLEEP_SLICE,
        };
        std::thread::sleep(slice);
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use wfwattch_frame::FrameError;

    use super::*;

    struct MockMeter {
        connected: bool,
        connects: usize,
        closes: usize,
        updates: Vec<Result<Reading, SessionError>>,
    }

    impl MockMeter {
        fn new(updates: Vec<Result<Reading, SessionError>>) -> Self {
            Self {
                connected: false,
                connects: 0,
                closes: 0,
                updates,
            }
        }
    }

    impl Meter for MockMeter {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn connect(&mut self, _timeout: Duration) -> Result<(), SessionError> {
            self.connects += 1;
            self.connected = true;
            Ok(())
        }

        fn update(&mut self, _timeout: Duration) -> Result<Reading, SessionError> {
            self.updates.remove(0)
        }

        fn close(&mut self) {
            self.closes += 1;
            self.connected = false;
        }
    }

    fn reading() -> Reading {
        Reading {
            timestamp: NaiveDate::from_ymd_opt(2024, 6, 5)
                .unwrap()
                .and_hms_opt(12, 15, 30)
                .unwrap(),
            voltage: 100.0,
            current: 0.25,
            power: 25.0,
        }
    }

    #[test]
    fn connects_once_and_reuses_connection() {
        let mut meter = MockMeter::new(vec![Ok(reading()), Ok(reading())]);
        let timeout = Duration::from_secs(1);

        poll_once(&mut meter, timeout).unwrap();
        poll_once(&mut meter, timeout).unwrap();

        assert_eq!(meter.connects, 1);
        assert_eq!(meter.closes, 0);
    }

    #[test]
    fn failure_closes_and_next_tick_reconnects() {
        let mut meter = MockMeter::new(vec![
            Err(SessionError::Frame(FrameError::ChecksumMismatch {
                expected: 0x01,
                actual: 0x02,
            })),
            Ok(reading()),
        ]);
        let timeout = Duration::from_secs(1);

        assert!(poll_once(&mut meter, timeout).is_err());
        assert_eq!(meter.closes, 1);
        assert!(!meter.connected);

        assert_eq!(poll_once(&mut meter, timeout).unwrap(), reading());
        assert_eq!(meter.connects, 2);
    }

    #[test]
    fn sleep_returns_when_stopped() {
        let running = AtomicBool::new(false);
        let start = Instant::now();
        sleep_until(Some(start + Duration::from_secs(10)), &running);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_without_deadline_waits_for_stop() {
        let running = Arc::new(AtomicBool::new(true));
        let stopper = {
            let running = running.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                running.store(false, Ordering::SeqCst);
            })
        };

        let start = Instant::now();
        sleep_until(None, &running);
        assert!(start.elapsed() >= Duration::from_millis(50));
        stopper.join().unwrap();
    }

    #[test]
    fn next_deadline_advances_by_interval() {
        let now = Instant::now();
        let interval = Duration::from_millis(250);
        assert_eq!(next_deadline(now, interval, now), Some(now + interval));
    }

    #[test]
    fn late_tick_is_not_in_the_past() {
        let start = Instant::now();
        let now = start + Duration::from_secs(3);
        assert_eq!(next_deadline(start, Duration::from_secs(1), now), Some(now));
    }

    #[test]
    fn maximal_interval_has_no_next_tick() {
        assert_eq!(next_deadline(Instant::now(), Duration::MAX, Instant::now()), None);
    }

    #[test]
    fn elapsed_deadline_returns_immediately() {
        let running = AtomicBool::new(true);
        let start = Instant::now();
        sleep_until(Some(start), &running);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
