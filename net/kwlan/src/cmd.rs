// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The firmware command queue.
//!
//! Commands go out one at a time. Each waits for its response for the
//! timeout of its class and is retransmitted up to the retry limit; after
//! the last timeout it is dropped and reported.

use alloc::{collections::VecDeque, vec::Vec};
use core::{
    sync::atomic::{AtomicU16, Ordering},
    time::Duration,
};

use spin::Mutex;

use crate::{Mode, PeerIndex};

/// Response timeout class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdClass {
    Normal,
    /// Commands the firmware takes long to answer (scans, resets).
    Long,
}

/// What a command is for, so the outcome can be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdKind {
    /// Opaque command from the firmware driver.
    Firmware,
    /// Block-ack session setup.
    AddBa { peer: PeerIndex, tid: u8 },
    /// Block-ack session teardown.
    DelBa { peer: PeerIndex, tid: u8 },
}

/// A queued or outstanding command.
#[derive(Debug)]
pub struct Command {
    pub seq: u16,
    pub mode: Mode,
    pub class: CmdClass,
    pub kind: CmdKind,
    payload: Vec<u8>,
    attempts: u32,
    deadline: Duration,
}

impl Command {
    /// Transmissions so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// What the TX consumer should do next about commands.
#[derive(Debug, PartialEq, Eq)]
pub enum CmdPoll {
    /// Nothing queued or outstanding.
    Idle,
    /// The outstanding command times out at the given time.
    Wait(Duration),
    /// Transmit this command.
    Send { seq: u16, mode: Mode, payload: Vec<u8> },
    /// Give up on this command.
    Dropped { seq: u16, kind: CmdKind },
}

struct Inner {
    queue: VecDeque<Command>,
    outstanding: Option<Command>,
}

/// Commands waiting for transmission or a response.
pub struct CommandQueue {
    inner: Mutex<Inner>,
    next_seq: AtomicU16,
    timeout: Duration,
    long_timeout: Duration,
    retry_limit: u32,
}

impl CommandQueue {
    pub fn new(timeout: Duration, long_timeout: Duration, retry_limit: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                outstanding: None,
            }),
            next_seq: AtomicU16::new(1),
            timeout,
            long_timeout,
            retry_limit,
        }
    }

    fn timeout_of(&self, class: CmdClass) -> Duration {
        match class {
            CmdClass::Normal => self.timeout,
            CmdClass::Long => self.long_timeout,
        }
    }

    /// Queues a command, returning its sequence number.
    pub fn submit(&self, mode: Mode, class: CmdClass, kind: CmdKind, payload: Vec<u8>) -> u16 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().queue.push_back(Command {
            seq,
            mode,
            class,
            kind,
            payload,
            attempts: 0,
            deadline: Duration::ZERO,
        });
        seq
    }

    /// Advances the queue to `now`.
    pub fn poll(&self, now: Duration) -> CmdPoll {
        let mut inner = self.inner.lock();
        if let Some(cmd) = inner.outstanding.as_mut() {
            if now < cmd.deadline {
                return CmdPoll::Wait(cmd.deadline);
            }
            if cmd.attempts > self.retry_limit {
                let seq = cmd.seq;
                let kind = cmd.kind;
                inner.outstanding = None;
                return CmdPoll::Dropped { seq, kind };
            }
            cmd.attempts += 1;
            cmd.deadline = now + self.timeout_of(cmd.class);
            debug!("cmd: retry {} (attempt {})", cmd.seq, cmd.attempts);
            return CmdPoll::Send {
                seq: cmd.seq,
                mode: cmd.mode,
                payload: cmd.payload.clone(),
            };
        }
        let Some(mut cmd) = inner.queue.pop_front() else {
            return CmdPoll::Idle;
        };
        cmd.attempts = 1;
        cmd.deadline = now + self.timeout_of(cmd.class);
        let send = CmdPoll::Send {
            seq: cmd.seq,
            mode: cmd.mode,
            payload: cmd.payload.clone(),
        };
        inner.outstanding = Some(cmd);
        send
    }

    /// The transmission of `seq` failed; it counts as an attempt and is
    /// retried on the next poll.
    pub fn push_failed(&self, seq: u16, now: Duration) {
        if let Some(cmd) = self.inner.lock().outstanding.as_mut() {
            if cmd.seq == seq {
                cmd.deadline = now;
            }
        }
    }

    /// Matches a response to the outstanding command.
    pub fn complete(&self, seq: u16) -> Option<Command> {
        let mut inner = self.inner.lock();
        if inner.outstanding.as_ref().is_some_and(|c| c.seq == seq) {
            inner.outstanding.take()
        } else {
            None
        }
    }

    /// Removes every command, outstanding first.
    pub fn abort_all(&self) -> Vec<Command> {
        let mut inner = self.inner.lock();
        let mut all: Vec<Command> = inner.outstanding.take().into_iter().collect();
        all.extend(inner.queue.drain(..));
        all
    }

    /// Commands queued or outstanding.
    pub fn pending(&self) -> usize {
        let inner = self.inner.lock();
        inner.queue.len() + inner.outstanding.is_some() as usize
    }
}
