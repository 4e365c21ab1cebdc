// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Dispatch threads for hosted builds.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use event_listener::Listener;

use crate::WlanDatapath;

/// Longest a consumer parks without a wakeup.
const IDLE_WAIT: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug)]
enum Direction {
    Tx,
    Rx,
}

/// The TX and RX consumers of a datapath, each on its own thread.
pub struct DispatchThreads {
    stop: Arc<AtomicBool>,
    dp: Arc<WlanDatapath>,
    tx: Option<JoinHandle<()>>,
    rx: Option<JoinHandle<()>>,
}

impl DispatchThreads {
    /// Starts both consumers.
    pub fn spawn(dp: Arc<WlanDatapath>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let tx = Self::spawn_one(&dp, &stop, Direction::Tx)?;
        let rx = match Self::spawn_one(&dp, &stop, Direction::Rx) {
            Ok(rx) => rx,
            Err(e) => {
                stop.store(true, Ordering::Release);
                dp.kick();
                let _ = tx.join();
                return Err(e);
            }
        };
        Ok(Self {
            stop,
            dp,
            tx: Some(tx),
            rx: Some(rx),
        })
    }

    fn spawn_one(
        dp: &Arc<WlanDatapath>,
        stop: &Arc<AtomicBool>,
        dir: Direction,
    ) -> std::io::Result<JoinHandle<()>> {
        let (dp, stop) = (dp.clone(), stop.clone());
        let name = match dir {
            Direction::Tx => "wlan-tx",
            Direction::Rx => "wlan-rx",
        };
        thread::Builder::new()
            .name(name.into())
            .spawn(move || run(&dp, &stop, dir))
    }

    /// Stops and joins both consumers.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.dp.kick();
        for handle in [self.tx.take(), self.rx.take()].into_iter().flatten() {
            if handle.join().is_err() {
                error!("dispatch: consumer thread panicked");
            }
        }
    }
}

impl Drop for DispatchThreads {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(dp: &WlanDatapath, stop: &AtomicBool, dir: Direction) {
    debug!("dispatch: {:?} consumer running", dir);
    while !stop.load(Ordering::Acquire) {
        // Listen before the cycle so a wakeup during it is not lost.
        let listener = match dir {
            Direction::Tx => dp.tx_listener(),
            Direction::Rx => dp.rx_listener(),
        };
        let outcome = match dir {
            Direction::Tx => dp.tx_cycle(),
            Direction::Rx => dp.rx_cycle(),
        };
        if outcome.work {
            continue;
        }
        let wait = outcome
            .next_wake
            .map_or(IDLE_WAIT, |at| at.saturating_sub(dp.now()).min(IDLE_WAIT));
        if !wait.is_zero() {
            listener.wait_timeout(wait);
        }
    }
    debug!("dispatch: {:?} consumer stopped", dir);
}
