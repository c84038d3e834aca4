use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, RecvError, Sender};

#[derive(Debug)]
enum PumpOp {
    Start { generation: u64, interval: Duration },
    Stop,
    Quit,
}

/// Periodic tick source running on its own thread. Every tick carries the
/// generation it was started with so the receiver can discard ticks that
/// belong to a run that has since been stopped.
pub(crate) struct Pump {
    control: Sender<PumpOp>,
    thread: Option<JoinHandle<()>>,
}

impl Pump {
    pub(crate) fn spawn<F>(on_tick: F) -> io::Result<Self>
    where
        F: Fn(u64) + Send + 'static,
    {
        let (control, ops) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name("stopwatch-pump".into())
            .spawn(move || pump_thread(ops, on_tick))?;
        Ok(Self { control, thread: Some(thread) })
    }

    pub(crate) fn start(&self, generation: u64, interval: Duration) {
        self.send(PumpOp::Start { generation, interval });
    }

    pub(crate) fn stop(&self) {
        self.send(PumpOp::Stop);
    }

    fn send(&self, op: PumpOp) {
        log::trace!("pump <- {:?}", op);
        if self.control.send(op).is_err() {
            log::error!("pump thread is gone");
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.send(PumpOp::Quit);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("pump thread panicked");
            }
        }
    }
}

enum Wake {
    Control(Result<PumpOp, RecvError>),
    Tick(u64),
}

fn pump_thread<F: Fn(u64)>(ops: Receiver<PumpOp>, on_tick: F) {
    let mut running: Option<(u64, Receiver<Instant>)> = None;

    loop {
        // Block on control alone while stopped; race it against the ticker while running.
        let wake = match &running {
            Some((generation, ticker)) => select! {
                recv(ops) -> op => Wake::Control(op),
                recv(ticker) -> _ => Wake::Tick(*generation),
            },
            None => Wake::Control(ops.recv()),
        };

        match wake {
            Wake::Tick(generation) => on_tick(generation),
            Wake::Control(Ok(PumpOp::Start { generation, interval })) => {
                running = Some((generation, crossbeam_channel::tick(interval)));
            }
            Wake::Control(Ok(PumpOp::Stop)) => running = None,
            Wake::Control(Ok(PumpOp::Quit) | Err(_)) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pump_ticks_only_while_started() {
        let count = Arc::new(AtomicU64::new(0));
        let seen = count.clone();
        let pump = Pump::spawn(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        pump.start(1, Duration::from_millis(1));
        thread::sleep(Duration::from_millis(50));
        pump.stop();
        // Let a tick that was already being delivered land.
        thread::sleep(Duration::from_millis(20));
        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop > 0);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_ticks_carry_generation() {
        let last = Arc::new(AtomicU64::new(0));
        let seen = last.clone();
        let pump = Pump::spawn(move |generation| seen.store(generation, Ordering::SeqCst)).unwrap();

        pump.start(7, Duration::from_millis(1));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(last.load(Ordering::SeqCst), 7);

        pump.start(8, Duration::from_millis(1));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(last.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_drop_joins_thread() {
        let pump = Pump::spawn(|_| {}).unwrap();
        pump.start(1, Duration::from_millis(1));
        drop(pump);
    }
}
