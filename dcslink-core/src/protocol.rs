//! Byte-level state machine for the export stream.
//!
//! The stream is a repeating sequence of blocks: 2-byte little-endian start
//! address, 2-byte little-endian byte count, then `count` bytes of 16-bit
//! words. Each decoded word yields a [`WriteEvent`] and advances the current
//! address by 2, wrapping modulo 65536.
//!
//! Two orthogonal pieces of state are updated together on every input byte:
//! the structural parse state, and a watchdog counting consecutive `0x55`
//! bytes. Four in a row force the decoder back to address parsing no matter
//! where the structural machine was — truncated or malformed datagrams must
//! never desynchronize the decoder past the next sync marker. An address
//! header of `0x5555` is reserved and means "wait for the next sync marker"
//! rather than a real address.
//!
//! The decoder knows nothing about fields; routing decoded words to field
//! decoders is the assembler's job.

use crate::types::WriteEvent;

/// The sync filler byte. Four consecutive occurrences form the resync marker.
pub const SYNC_BYTE: u8 = 0x55;

/// Reserved address header meaning "no data follows, wait for sync".
pub const SYNC_ADDRESS: u16 = 0x5555;

/// Consecutive sync bytes required to force resynchronization.
const SYNC_RUN: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitForSync,
    AddressLow,
    AddressHigh,
    CountLow,
    CountHigh,
    DataLow,
    DataHigh,
}

/// Incremental decoder from raw bytes to [`WriteEvent`]s.
///
/// Feed bytes strictly in arrival order; the decoder holds partial header
/// and word state across calls, so datagram boundaries are invisible to it.
#[derive(Debug)]
pub struct StreamDecoder {
    state: State,
    sync_run: u8,
    address: u16,
    count: u16,
    word: u16,
}

impl StreamDecoder {
    /// Create a decoder awaiting the first sync marker.
    pub fn new() -> Self {
        StreamDecoder {
            state: State::WaitForSync,
            sync_run: 0,
            address: 0,
            count: 0,
            word: 0,
        }
    }

    /// Return to `WaitForSync` with all accumulators cleared.
    pub fn reset(&mut self) {
        *self = StreamDecoder::new();
    }

    /// Process one byte. Returns a write event when this byte completes a word.
    pub fn push(&mut self, byte: u8) -> Option<WriteEvent> {
        let mut event = None;

        match self.state {
            State::AddressLow => {
                self.address = byte as u16;
                self.state = State::AddressHigh;
            }
            State::AddressHigh => {
                self.address |= (byte as u16) << 8;
                self.state = if self.address == SYNC_ADDRESS {
                    State::WaitForSync
                } else {
                    State::CountLow
                };
            }
            State::CountLow => {
                self.count = byte as u16;
                self.state = State::CountHigh;
            }
            State::CountHigh => {
                self.count |= (byte as u16) << 8;
                self.state = State::DataLow;
            }
            State::DataLow => {
                self.word = byte as u16;
                self.count = self.count.saturating_sub(1);
                self.state = State::DataHigh;
            }
            State::DataHigh => {
                self.word |= (byte as u16) << 8;
                self.count = self.count.saturating_sub(1);
                event = Some(WriteEvent {
                    address: self.address,
                    word: self.word,
                });
                self.address = self.address.wrapping_add(2);
                self.state = if self.count > 0 {
                    State::DataLow
                } else {
                    State::AddressLow
                };
            }
            State::WaitForSync => {}
        }

        // Sync watchdog. Runs on every byte and overrides whatever transition
        // just happened, including mid-header and mid-word.
        if byte == SYNC_BYTE {
            self.sync_run += 1;
        } else {
            self.sync_run = 0;
        }
        if self.sync_run == SYNC_RUN {
            self.state = State::AddressLow;
            self.sync_run = 0;
        }

        event
    }

    /// Process a byte slice in order, collecting all completed write events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<WriteEvent> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        StreamDecoder::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
