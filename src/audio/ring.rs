// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Lock-free single-producer single-consumer ring of f32 samples. The playback thread writes,
/// the device callback reads. Samples are stored as raw bits so no unsafe code is needed.
pub(crate) struct SampleRing {
    /// Backing slots, length is a power of two.
    slots: Box<[AtomicU32]>,
    /// Index mask for the slots.
    mask: usize,
    /// Total samples ever written. Only the producer stores to this.
    written: AtomicUsize,
    /// Total samples ever read. Only the consumer stores to this.
    read: AtomicUsize,
}

impl SampleRing {
    /// Creates a ring holding at least `capacity` samples.
    pub(crate) fn new(capacity: usize) -> SampleRing {
        let capacity = capacity.max(1).next_power_of_two();
        SampleRing {
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            mask: capacity - 1,
            written: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of samples waiting to be read.
    #[inline]
    pub(crate) fn available(&self) -> usize {
        self.written
            .load(Ordering::Acquire)
            .wrapping_sub(self.read.load(Ordering::Acquire))
    }

    /// Writes as many samples as fit and returns how many were written.
    pub(crate) fn write(&self, samples: &[f32]) -> usize {
        let written = self.written.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        let space = self.capacity() - written.wrapping_sub(read);
        let count = space.min(samples.len());

        for (offset, sample) in samples[..count].iter().enumerate() {
            self.slots[written.wrapping_add(offset) & self.mask]
                .store(sample.to_bits(), Ordering::Relaxed);
        }

        self.written
            .store(written.wrapping_add(count), Ordering::Release);
        count
    }

    /// Reads up to `output.len()` samples and returns how many were read.
    pub(crate) fn read(&self, output: &mut [f32]) -> usize {
        let read = self.read.load(Ordering::Relaxed);
        let written = self.written.load(Ordering::Acquire);
        let count = written.wrapping_sub(read).min(output.len());

        for (offset, sample) in output[..count].iter_mut().enumerate() {
            *sample = f32::from_bits(
                self.slots[read.wrapping_add(offset) & self.mask].load(Ordering::Relaxed),
            );
        }

        self.read.store(read.wrapping_add(count), Ordering::Release);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_up() {
        assert_eq!(1024, SampleRing::new(1000).capacity());
        assert_eq!(1, SampleRing::new(0).capacity());
    }

    #[test]
    fn test_write_stops_when_full() {
        let ring = SampleRing::new(4);
        assert_eq!(4, ring.write(&[0.1, 0.2, 0.3, 0.4, 0.5]));
        assert_eq!(0, ring.write(&[0.6]));
        assert_eq!(4, ring.available());
    }

    #[test]
    fn test_wraps_around() {
        let ring = SampleRing::new(4);
        let mut output = [0.0f32; 3];

        assert_eq!(3, ring.write(&[1.0, 2.0, 3.0]));
        assert_eq!(3, ring.read(&mut output));
        assert_eq!([1.0, 2.0, 3.0], output);

        // The next write straddles the end of the backing slots.
        assert_eq!(4, ring.write(&[4.0, 5.0, 6.0, 7.0]));
        let mut output = [0.0f32; 6];
        assert_eq!(4, ring.read(&mut output));
        assert_eq!([4.0, 5.0, 6.0, 7.0], output[..4]);
        assert_eq!(0, ring.available());
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        use std::sync::Arc;
        use std::thread;

        let ring = Arc::new(SampleRing::new(64));
        let total = 10_000usize;

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let samples: Vec<f32> = (0..total).map(|i| i as f32).collect();
                let mut offset = 0;
                while offset < total {
                    offset += ring.write(&samples[offset..]);
                    thread::yield_now();
                }
            })
        };

        let mut received = Vec::with_capacity(total);
        let mut scratch = [0.0f32; 17];
        while received.len() < total {
            let read = ring.read(&mut scratch);
            received.extend_from_slice(&scratch[..read]);
            thread::yield_now();
        }
        producer.join().unwrap();

        assert!(received.iter().enumerate().all(|(i, s)| *s == i as f32));
    }
}
